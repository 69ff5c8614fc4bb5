//! Channel plumbing for engines that generate on a background task

use super::GenerationFragment;
use crate::Result;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Producer half held by the generating task
pub type FragmentSender = mpsc::Sender<Result<GenerationFragment>>;

/// Adapts the receiving end of a bounded fragment channel to `Stream`.
///
/// The stream ends when every sender is dropped. Dropping the receiver makes
/// further sends fail, which producers treat as a stop signal.
pub struct FragmentReceiver {
    receiver: mpsc::Receiver<Result<GenerationFragment>>,
}

impl FragmentReceiver {
    pub fn new(receiver: mpsc::Receiver<Result<GenerationFragment>>) -> Self {
        Self { receiver }
    }
}

impl Stream for FragmentReceiver {
    type Item = Result<GenerationFragment>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

/// Bounded channel; a small capacity keeps the producer close to the consumer
pub fn fragment_channel(capacity: usize) -> (FragmentSender, FragmentReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, FragmentReceiver::new(rx))
}
