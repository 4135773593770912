//! Creating, resizing and removing audios.

use itertools::Itertools;

use crate::error::{EngineError, Result};
use crate::tree::{Audio, AudioFlags, AudioId, Channel, ChannelId, Direction, Tree};

impl Tree {
    /// Add an audio with the given chains.
    pub fn add_audio(
        &mut self,
        name: impl Into<String>,
        flags: AudioFlags,
        audio_channels: usize,
        output_pads: usize,
        input_pads: usize,
    ) -> Result<AudioId> {
        if audio_channels == 0 {
            return Err(EngineError::OutOfRange(
                "an audio needs at least one audio channel".into(),
            ));
        }

        let id = self.alloc_audio();
        let name = name.into();
        self.audios.insert(
            id,
            Audio {
                id,
                name: name.clone(),
                flags,
                audio_channels,
                output_pads: 0,
                input_pads: 0,
                outputs: Vec::new(),
                inputs: Vec::new(),
                containers: Vec::new(),
                recall_ids: Vec::new(),
            },
        );
        self.audio_order.push(id);

        self.resize_pads(id, Direction::Input, input_pads)?;
        self.resize_pads(id, Direction::Output, output_pads)?;

        tracing::debug!(audio = %id, %name, audio_channels, output_pads, input_pads, "audio added");
        Ok(id)
    }

    /// Remove an audio, its channels, recyclings, containers and every voice
    /// running on it. Linked channels on other audios are unlinked.
    pub fn remove_audio(&mut self, audio: AudioId) -> Result<()> {
        let a = self.audio(audio)?;
        let voices = a.recall_ids.clone();
        let channels: Vec<ChannelId> = a.outputs.iter().chain(a.inputs.iter()).copied().collect();
        let containers = a.containers.clone();

        for v in voices {
            if self.voices.contains_key(&v) {
                self.remove_voice_tree(v);
            }
        }
        for c in &channels {
            self.set_link(*c, None)?;
        }
        for c in channels {
            self.discard_channel(c);
        }
        for container in containers {
            self.containers.remove(&container);
        }
        self.audios.remove(&audio);
        self.audio_order.retain(|a| *a != audio);
        self.touch();

        tracing::debug!(%audio, "audio removed");
        Ok(())
    }

    /// Grow or shrink one chain of an audio to `pads` pads.
    pub fn resize_pads(&mut self, audio: AudioId, direction: Direction, pads: usize) -> Result<()> {
        let a = self.audio(audio)?;
        let old = a.pads(direction);
        let audio_channels = a.audio_channels;
        if old == pads {
            return Ok(());
        }

        let mut created = Vec::new();
        if pads > old {
            for pad in old..pads {
                for ac in 0..audio_channels {
                    let c = self.new_channel(audio, direction, pad, ac);
                    self.audio_mut(audio)?.chain_mut(direction).push(c);
                    created.push(c);
                }
            }
        } else {
            let removed: Vec<ChannelId> = self.audio(audio)?.chain(direction)[pads * audio_channels..].to_vec();
            for c in &removed {
                self.set_link(*c, None)?;
                self.detach_channel_from_voices(*c);
            }
            for c in &removed {
                self.discard_channel(*c);
            }
            self.audio_mut(audio)?
                .chain_mut(direction)
                .truncate(pads * audio_channels);
        }

        match direction {
            Direction::Output => self.audio_mut(audio)?.output_pads = pads,
            Direction::Input => self.audio_mut(audio)?.input_pads = pads,
        }
        self.finish_resize(audio, &created)?;

        tracing::debug!(%audio, ?direction, old, new = pads, "pads resized");
        Ok(())
    }

    /// Grow or shrink the number of audio channels of both chains.
    pub fn resize_audio_channels(&mut self, audio: AudioId, audio_channels: usize) -> Result<()> {
        if audio_channels == 0 {
            return Err(EngineError::OutOfRange(
                "an audio needs at least one audio channel".into(),
            ));
        }
        let a = self.audio(audio)?;
        let old = a.audio_channels;
        if old == audio_channels {
            return Ok(());
        }

        let mut created = Vec::new();
        for direction in [Direction::Input, Direction::Output] {
            let a = self.audio(audio)?;
            let pads = a.pads(direction);
            let chain = a.chain(direction).to_vec();

            let removed: Vec<ChannelId> = chain
                .iter()
                .enumerate()
                .filter(|(line, _)| line % old >= audio_channels)
                .map(|(_, c)| *c)
                .collect();
            for c in &removed {
                self.set_link(*c, None)?;
                self.detach_channel_from_voices(*c);
            }

            let mut relaid = Vec::with_capacity(pads * audio_channels);
            for pad in 0..pads {
                for ac in 0..audio_channels {
                    if ac < old {
                        relaid.push(chain[pad * old + ac]);
                    } else {
                        let c = self.new_channel(audio, direction, pad, ac);
                        created.push(c);
                        relaid.push(c);
                    }
                }
            }
            for c in removed {
                self.discard_channel(c);
            }
            *self.audio_mut(audio)?.chain_mut(direction) = relaid;
        }

        self.audio_mut(audio)?.audio_channels = audio_channels;
        self.finish_resize(audio, &created)?;

        tracing::debug!(%audio, old, new = audio_channels, "audio channels resized");
        Ok(())
    }

    fn new_channel(&mut self, audio: AudioId, direction: Direction, pad: usize, audio_channel: usize) -> ChannelId {
        let id = self.alloc_channel();
        self.channels
            .insert(id, Channel::new(id, audio, direction, pad, audio_channel, 0));
        id
    }

    /// Drop a channel that is already unlinked and detached from voices.
    fn discard_channel(&mut self, channel: ChannelId) {
        let Some(c) = self.channels.remove(&channel) else {
            return;
        };
        if let Some(r) = c.recycling {
            self.remove_recycling(r);
        }
        for thread in c.playback.channel_threads() {
            thread.stop();
        }
        for container in self.containers.values_mut() {
            container.forget_channel(channel);
        }
    }

    /// Shared tail of every resize: relink the chains, hand out recyclings,
    /// recompute ranges, extend containers and map running voices.
    fn finish_resize(&mut self, audio: AudioId, created: &[ChannelId]) -> Result<()> {
        self.relink_chains(audio)?;

        let a = self.audio(audio)?;
        let flags = a.flags;
        let inputs = a.inputs.clone();
        let outputs = a.outputs.clone();

        for c in created {
            let ch = self.channel(*c)?;
            let wants = match ch.direction {
                Direction::Output => flags.contains(AudioFlags::OUTPUT_HAS_RECYCLING),
                Direction::Input => flags.contains(AudioFlags::INPUT_HAS_RECYCLING) && ch.link.is_none(),
            };
            if wants {
                self.create_own_recycling(*c)?;
            }
        }

        for c in inputs.iter().chain(outputs.iter()) {
            self.update_range(*c);
        }

        self.extend_containers(audio, created)?;
        self.map_new_channels(audio, created);
        self.touch();
        Ok(())
    }

    /// Recompute line, prev/next and prev_pad/next_pad from chain order.
    fn relink_chains(&mut self, audio: AudioId) -> Result<()> {
        let a = self.audio(audio)?;
        let ac = a.audio_channels;
        let chains = [a.outputs.clone(), a.inputs.clone()];

        for chain in chains {
            for (line, id) in chain.iter().enumerate() {
                let c = self.channel_mut(*id)?;
                c.line = line;
                c.pad = line / ac;
                c.audio_channel = line % ac;
                c.prev = None;
                c.next = None;
                c.prev_pad = line.checked_sub(ac).map(|l| chain[l]);
                c.next_pad = chain.get(line + ac).copied();
            }
            for (a, b) in chain.iter().copied().tuple_windows() {
                self.channel_mut(a)?.next = Some(b);
                self.channel_mut(b)?.prev = Some(a);
            }
        }
        Ok(())
    }
}
