//! Lifecycle stages of a voice.

/// Readiness levels of INIT, run in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InitStage {
    /// Buffers and signals
    Allocate,
    /// Port wiring and plugin port connection
    Wire,
    /// Activation right before the first run
    Prime,
}

impl InitStage {
    pub const ALL: [InitStage; 3] = [InitStage::Allocate, InitStage::Wire, InitStage::Prime];
}

/// Sub-stages of one processing cycle. Each runs over the whole graph
/// before the next one starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RunStage {
    Pre,
    Inter,
    Post,
}

impl RunStage {
    pub const ALL: [RunStage; 3] = [RunStage::Pre, RunStage::Inter, RunStage::Post];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Embryonic,
    Duplicate,
    Resolve,
    Init(InitStage),
    Run,
    Done,
    Cancel,
    Remove,
}

impl Stage {
    /// Every stage a voice in `self` may move to.
    pub fn successors(self) -> &'static [Stage] {
        use Stage::*;
        match self {
            Embryonic => &[Duplicate, Cancel],
            Duplicate => &[Resolve, Cancel],
            Resolve => &[Init(InitStage::Allocate), Cancel],
            Init(InitStage::Allocate) => &[Init(InitStage::Wire), Cancel],
            Init(InitStage::Wire) => &[Init(InitStage::Prime), Cancel],
            Init(InitStage::Prime) => &[Run, Cancel],
            Run => &[Done, Cancel],
            Done | Cancel => &[Remove],
            Remove => &[],
        }
    }

    pub fn can_advance_to(self, to: Stage) -> bool {
        self.successors().contains(&to)
    }

    /// Before RUN; a failure here cancels the voice tree.
    pub fn is_pre_run(self) -> bool {
        matches!(
            self,
            Stage::Embryonic | Stage::Duplicate | Stage::Resolve | Stage::Init(_)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Cancel | Stage::Remove)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_legal() {
        let path = [
            Stage::Embryonic,
            Stage::Duplicate,
            Stage::Resolve,
            Stage::Init(InitStage::Allocate),
            Stage::Init(InitStage::Wire),
            Stage::Init(InitStage::Prime),
            Stage::Run,
            Stage::Done,
            Stage::Remove,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn cancel_reachable_until_run_ends() {
        for stage in [
            Stage::Embryonic,
            Stage::Duplicate,
            Stage::Resolve,
            Stage::Init(InitStage::Wire),
            Stage::Run,
        ] {
            assert!(stage.can_advance_to(Stage::Cancel));
        }
        assert!(!Stage::Done.can_advance_to(Stage::Cancel));
        assert!(!Stage::Run.can_advance_to(Stage::Resolve));
        assert!(Stage::Remove.successors().is_empty());
    }
}
