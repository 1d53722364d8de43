/// Every stage of the pipeline yields the byte offset reached in the capture
/// along with the stage's result.
pub type Event<T> = (usize, anyhow::Result<T>);
