#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Quit,
    Help,
    /// Print the sidebar list.
    List,
    /// Play a sidebar entry (1-based).
    Select(usize),
    /// Play an arbitrary stream url.
    PlayUrl(String),
    Pause,
    Resume,
}
