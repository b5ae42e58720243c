/// Coarse loading signal for the hosting surface, separate from the
/// per-view `is_loading` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingAction {
    Started { load_all: bool },
    Ended { load_all: bool },
}
