use smudge_atlas::TextId;

/// Events a [`Smudge`](crate::Smudge) emits to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The first build was installed.
    Ready,
    /// A later build was installed.
    Update,
    /// A frame was rendered for a playing text.
    Render(TextId),
    /// A rebuild triggered by a change failed. The previous build stays installed.
    BuildFailed(String),
}
