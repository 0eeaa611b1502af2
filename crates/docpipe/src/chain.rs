//! Chain elements and pipeline composition.
//!
//! A [`ChainElement`] receives one message and an emission-callback pair:
//! `further` delivers downstream, `back` delivers upstream. Both return the
//! neighbour's [`Continuation`]; an element observing `Stop` from its
//! neighbour should stop producing and return `Stop` itself, propagating
//! termination toward the source.
//!
//! A [`Pipeline`] is an ordered list of elements. Forward emission is a
//! synchronous call into the next element. Reverse emissions are queued by
//! the composition and handed to the upstream element's
//! [`ChainElement::receive_back`] once its own `process` call for the
//! current message has returned; elements hold no references to each other,
//! the pipeline owns them all (the ownership-safe rendering of the
//! weak-parent-handle design).

use crate::error::{DocpipeError, Result};
use crate::message::{Continuation, Message};
use std::collections::VecDeque;

/// Signature of an emission callback.
pub type EmitFn<'a> = dyn FnMut(Message) -> Result<Continuation> + 'a;

/// Emission callbacks handed to [`ChainElement::process`].
pub struct MessageCallbacks<'a> {
    further: &'a mut EmitFn<'a>,
    back: &'a mut EmitFn<'a>,
}

impl<'a> MessageCallbacks<'a> {
    pub fn new(further: &'a mut EmitFn<'a>, back: &'a mut EmitFn<'a>) -> Self {
        MessageCallbacks { further, back }
    }

    /// Emit a message downstream and return the consumer's continuation.
    pub fn further(&mut self, message: Message) -> Result<Continuation> {
        (self.further)(message)
    }

    /// Emit a message upstream.
    pub fn back(&mut self, message: Message) -> Result<Continuation> {
        (self.back)(message)
    }

    /// Emit downstream, treating `Skip` as `Proceed`. For non-structural
    /// messages skip has no subtree to act on.
    pub fn further_flat(&mut self, message: Message) -> Result<Continuation> {
        match self.further(message)? {
            Continuation::Stop => Ok(Continuation::Stop),
            _ => Ok(Continuation::Proceed),
        }
    }

    /// Borrow the two underlying callbacks separately, for elements that
    /// need to rewire the forward path while keeping the reverse one.
    pub fn split(&mut self) -> (&mut EmitFn<'a>, &mut EmitFn<'a>) {
        (&mut *self.further, &mut *self.back)
    }
}

/// A processing node of the pipeline.
pub trait ChainElement: Send {
    /// Handle one incoming message, emitting zero or more messages through
    /// `callbacks`, and return the continuation for the upstream producer.
    fn process(
        &mut self,
        message: Message,
        callbacks: &mut MessageCallbacks<'_>,
    ) -> Result<Continuation>;

    /// Handle a message travelling upstream. The default keeps it moving
    /// toward the pipeline root.
    fn receive_back(
        &mut self,
        message: Message,
        callbacks: &mut MessageCallbacks<'_>,
    ) -> Result<Continuation> {
        callbacks.back(message)
    }

    /// Leaves terminate a pipeline; only exporters are leaves.
    fn is_leaf(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "chain-element"
    }
}

/// Result of feeding one message through a pipeline.
#[derive(Debug)]
pub struct PipelineRun {
    /// Continuation returned by the first element.
    pub continuation: Continuation,
    /// Messages that flowed past the last element.
    pub emitted: Vec<Message>,
    /// Messages that travelled upstream past the first element.
    pub reversed: Vec<Message>,
}

/// An ordered composition of chain elements.
///
/// ```
/// use docpipe::chain::{Pipeline, Transformer};
/// use docpipe::message::{Continuation, Message};
///
/// let mut pipeline = Pipeline::new()
///     .then(Transformer::new(|_msg| Continuation::Proceed));
/// let run = pipeline.process(Message::text("hi")).unwrap();
/// assert_eq!(run.emitted.len(), 1);
/// ```
#[derive(Default)]
pub struct Pipeline {
    elements: Vec<Box<dyn ChainElement>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline { elements: Vec::new() }
    }

    /// Append an element; the binary `|` composition of the builder API.
    pub fn then<E: ChainElement + 'static>(mut self, element: E) -> Self {
        self.elements.push(Box::new(element));
        self
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// A pipeline must terminate in a leaf, otherwise emitted bytes would
    /// have nowhere to go.
    pub fn validate(&self) -> Result<()> {
        match self.elements.last() {
            None => Err(DocpipeError::validation("pipeline is empty")),
            Some(last) if !last.is_leaf() => Err(DocpipeError::validation(format!(
                "pipeline must terminate in a leaf element, found '{}'",
                last.name()
            ))),
            Some(_) => Ok(()),
        }
    }

    /// Feed one message into the first element.
    pub fn process(&mut self, message: Message) -> Result<PipelineRun> {
        let mut emitted = Vec::new();
        let mut sink = |m: Message| {
            emitted.push(m);
            Ok(Continuation::Proceed)
        };
        let (continuation, reversed) = drive(&mut self.elements, message, &mut sink)?;
        Ok(PipelineRun {
            continuation,
            emitted,
            reversed,
        })
    }
}

/// The pipe-operator spelling of [`Pipeline::then`]:
/// `Pipeline::new() | detector | parser | exporter`.
impl<E: ChainElement + 'static> std::ops::BitOr<E> for Pipeline {
    type Output = Pipeline;

    fn bitor(self, element: E) -> Pipeline {
        self.then(element)
    }
}

impl ChainElement for Pipeline {
    fn process(
        &mut self,
        message: Message,
        callbacks: &mut MessageCallbacks<'_>,
    ) -> Result<Continuation> {
        let mut sink = |m: Message| (callbacks.further)(m);
        let (continuation, reversed) = drive(&mut self.elements, message, &mut sink)?;
        for m in reversed {
            (callbacks.back)(m)?;
        }
        Ok(continuation)
    }

    fn is_leaf(&self) -> bool {
        self.elements.last().map(|e| e.is_leaf()).unwrap_or(false)
    }

    fn name(&self) -> &'static str {
        "pipeline"
    }
}

/// Recursive forward drive over a disjoint tail slice. Returns the first
/// element's continuation and the reverse messages that left the subchain.
fn drive(
    elements: &mut [Box<dyn ChainElement>],
    message: Message,
    sink: &mut dyn FnMut(Message) -> Result<Continuation>,
) -> Result<(Continuation, Vec<Message>)> {
    let Some((first, rest)) = elements.split_first_mut() else {
        let continuation = sink(message)?;
        return Ok((continuation, Vec::new()));
    };

    let mut upward = Vec::new();
    let mut pending = Vec::new();
    let continuation = {
        let mut further = |m: Message| -> Result<Continuation> {
            let (c, backs) = drive(rest, m, &mut *sink)?;
            pending.extend(backs);
            Ok(c)
        };
        let mut back = |m: Message| -> Result<Continuation> {
            upward.push(m);
            Ok(Continuation::Proceed)
        };
        let mut callbacks = MessageCallbacks::new(&mut further, &mut back);
        first.process(message, &mut callbacks)?
    };

    // Deferred reverse delivery, now that `first` is free again. Reverse
    // handling may itself emit both ways.
    let mut queue: VecDeque<Message> = pending.into();
    while let Some(m) = queue.pop_front() {
        let mut from_rest = Vec::new();
        {
            let mut further = |m2: Message| -> Result<Continuation> {
                let (c, backs) = drive(rest, m2, &mut *sink)?;
                from_rest.extend(backs);
                Ok(c)
            };
            let mut back = |m2: Message| -> Result<Continuation> {
                upward.push(m2);
                Ok(Continuation::Proceed)
            };
            let mut callbacks = MessageCallbacks::new(&mut further, &mut back);
            first.receive_back(m, &mut callbacks)?;
        }
        queue.extend(from_rest);
    }

    Ok((continuation, upward))
}

/// Wrap a closure observing (and possibly rewriting) every message as a
/// chain element. Returning `Skip` drops the message and asks the producer
/// to skip the subtree; `Stop` terminates the producer.
pub struct Transformer<F>
where
    F: FnMut(&mut Message) -> Continuation + Send,
{
    func: F,
}

impl<F> Transformer<F>
where
    F: FnMut(&mut Message) -> Continuation + Send,
{
    pub fn new(func: F) -> Self {
        Transformer { func }
    }
}

impl<F> ChainElement for Transformer<F>
where
    F: FnMut(&mut Message) -> Continuation + Send,
{
    fn process(
        &mut self,
        mut message: Message,
        callbacks: &mut MessageCallbacks<'_>,
    ) -> Result<Continuation> {
        match (self.func)(&mut message) {
            Continuation::Stop => Ok(Continuation::Stop),
            Continuation::Skip => Ok(Continuation::Skip),
            Continuation::Proceed => callbacks.further(message),
        }
    }

    fn name(&self) -> &'static str {
        "transformer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Styling;

    /// Emits a fixed structure when it sees a Text trigger.
    struct Producer;

    impl ChainElement for Producer {
        fn process(
            &mut self,
            message: Message,
            callbacks: &mut MessageCallbacks<'_>,
        ) -> Result<Continuation> {
            if !matches!(message, Message::Text(_)) {
                return callbacks.further(message);
            }
            match callbacks.further(Message::Paragraph(Styling::default()))? {
                Continuation::Proceed => {
                    if callbacks.further(Message::text("child"))? == Continuation::Stop {
                        return Ok(Continuation::Stop);
                    }
                }
                Continuation::Skip => {}
                Continuation::Stop => return Ok(Continuation::Stop),
            }
            callbacks.further(Message::CloseParagraph)?;
            Ok(Continuation::Proceed)
        }
    }

    struct SkipParagraphs;

    impl ChainElement for SkipParagraphs {
        fn process(
            &mut self,
            message: Message,
            callbacks: &mut MessageCallbacks<'_>,
        ) -> Result<Continuation> {
            let skip = matches!(message, Message::Paragraph(_));
            callbacks.further(message)?;
            if skip {
                Ok(Continuation::Skip)
            } else {
                Ok(Continuation::Proceed)
            }
        }
    }

    struct StopAtFirst;

    impl ChainElement for StopAtFirst {
        fn process(
            &mut self,
            message: Message,
            callbacks: &mut MessageCallbacks<'_>,
        ) -> Result<Continuation> {
            callbacks.further(message)?;
            Ok(Continuation::Stop)
        }
    }

    struct Leaf;

    impl ChainElement for Leaf {
        fn process(
            &mut self,
            message: Message,
            callbacks: &mut MessageCallbacks<'_>,
        ) -> Result<Continuation> {
            callbacks.further(message)
        }

        fn is_leaf(&self) -> bool {
            true
        }

        fn name(&self) -> &'static str {
            "leaf"
        }
    }

    #[test]
    fn test_forward_flow_in_order() {
        let mut pipeline = Pipeline::new().then(Producer);
        let run = pipeline.process(Message::text("trigger")).unwrap();
        let names: Vec<_> = run.emitted.iter().map(|m| m.tag_name()).collect();
        assert_eq!(names, vec!["paragraph", "text", "close_paragraph"]);
        assert_eq!(run.continuation, Continuation::Proceed);
    }

    #[test]
    fn test_skip_suppresses_children_but_not_closer() {
        let mut pipeline = Pipeline::new().then(Producer).then(SkipParagraphs);
        let run = pipeline.process(Message::text("trigger")).unwrap();
        let names: Vec<_> = run.emitted.iter().map(|m| m.tag_name()).collect();
        assert_eq!(names, vec!["paragraph", "close_paragraph"]);
    }

    #[test]
    fn test_stop_propagates_upstream() {
        let mut pipeline = Pipeline::new().then(Producer).then(StopAtFirst);
        let run = pipeline.process(Message::text("trigger")).unwrap();
        // The producer stops right after the first emission.
        let names: Vec<_> = run.emitted.iter().map(|m| m.tag_name()).collect();
        assert_eq!(names, vec!["paragraph"]);
        assert_eq!(run.continuation, Continuation::Stop);
    }

    #[test]
    fn test_transformer_skip_drops_message() {
        let mut pipeline = Pipeline::new().then(Transformer::new(|m: &mut Message| {
            if matches!(m, Message::Comment(_)) {
                Continuation::Skip
            } else {
                Continuation::Proceed
            }
        }));
        let run = pipeline
            .process(Message::Comment(crate::message::Comment::default()))
            .unwrap();
        assert!(run.emitted.is_empty());
        let run = pipeline.process(Message::text("kept")).unwrap();
        assert_eq!(run.emitted.len(), 1);
    }

    #[test]
    fn test_reverse_emission_reaches_upstream_element() {
        struct BackSender;
        impl ChainElement for BackSender {
            fn process(
                &mut self,
                message: Message,
                callbacks: &mut MessageCallbacks<'_>,
            ) -> Result<Continuation> {
                callbacks.back(Message::text("rendered"))?;
                callbacks.further(message)
            }
        }

        struct BackRecorder {
            seen: std::sync::Arc<parking_lot::Mutex<Vec<String>>>,
        }
        impl ChainElement for BackRecorder {
            fn process(
                &mut self,
                message: Message,
                callbacks: &mut MessageCallbacks<'_>,
            ) -> Result<Continuation> {
                callbacks.further(message)
            }

            fn receive_back(
                &mut self,
                message: Message,
                _callbacks: &mut MessageCallbacks<'_>,
            ) -> Result<Continuation> {
                self.seen.lock().push(message.tag_name().to_string());
                Ok(Continuation::Proceed)
            }
        }

        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new()
            .then(BackRecorder { seen: seen.clone() })
            .then(BackSender);
        let run = pipeline.process(Message::text("in")).unwrap();
        assert_eq!(run.emitted.len(), 1);
        assert_eq!(seen.lock().as_slice(), &["text".to_string()]);
        assert!(run.reversed.is_empty());
    }

    #[test]
    fn test_reverse_emission_from_first_element_reaches_root() {
        struct RootBackSender;
        impl ChainElement for RootBackSender {
            fn process(
                &mut self,
                message: Message,
                callbacks: &mut MessageCallbacks<'_>,
            ) -> Result<Continuation> {
                callbacks.back(Message::text("to-root"))?;
                callbacks.further(message)
            }
        }

        let mut pipeline = Pipeline::new().then(RootBackSender);
        let run = pipeline.process(Message::text("in")).unwrap();
        assert_eq!(run.reversed.len(), 1);
    }

    #[test]
    fn test_validate_requires_leaf() {
        let pipeline = Pipeline::new().then(Producer);
        assert!(pipeline.validate().is_err());
        let pipeline = Pipeline::new().then(Producer).then(Leaf);
        assert!(pipeline.validate().is_ok());
        assert!(Pipeline::new().validate().is_err());
    }

    #[test]
    fn test_pipe_operator_composition() {
        let mut pipeline = Pipeline::new() | Producer | SkipParagraphs;
        let run = pipeline.process(Message::text("trigger")).unwrap();
        let names: Vec<_> = run.emitted.iter().map(|m| m.tag_name()).collect();
        assert_eq!(names, vec!["paragraph", "close_paragraph"]);
    }

    #[test]
    fn test_nested_pipeline_is_an_element() {
        let inner = Pipeline::new().then(Producer);
        let mut outer = Pipeline::new().then(inner).then(SkipParagraphs);
        let run = outer.process(Message::text("trigger")).unwrap();
        let names: Vec<_> = run.emitted.iter().map(|m| m.tag_name()).collect();
        assert_eq!(names, vec!["paragraph", "close_paragraph"]);
    }
}
