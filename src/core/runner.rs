use std::rc::Rc;

use crate::core::message::HttpContent;

/// A pipeline stage that accepts messages of type `I` and their body chunks.
pub trait FilterRunner<I> {
    /// Process a whole message (head plus whatever body is buffered so far).
    fn filter(&self, message: I);

    /// Process one more body chunk of a message already passed to [`FilterRunner::filter`].
    fn filter_chunk(&self, message: I, chunk: HttpContent);
}

/// The stage a runner forwards its output to; `None` means the transport.
pub type NextStage<O> = Option<Rc<dyn FilterRunner<O>>>;

/// Result of running one filter.
#[derive(Debug)]
#[must_use]
pub enum FilterOutcome<O> {
    /// The filter produced its output synchronously.
    Ready(O),
    /// The filter will resume the stage later (waiting on body or async work).
    Suspended,
}
