// Copyright 2021 Damir Jelić
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::{Stream, StreamExt, stream::BoxStream};

/// Flattens a stream of keys into the stream of the latest key.
///
/// Every key the outer stream yields is turned into an inner stream by
/// `subscribe`, replacing (and dropping) the previous inner stream. Keys are
/// handled in order: a new inner stream is polled once as soon as it is
/// subscribed to, so an item it has ready, like an initial snapshot, is
/// always yielded. Otherwise the next pending key supersedes it, and an inner
/// stream never yields once a newer key is available.
///
/// The stream ends once the outer stream and the last inner stream ended.
pub(super) struct SwitchLatest<S, F, T> {
    keys: Option<S>,
    inner: Option<BoxStream<'static, T>>,
    subscribe: F,
}

impl<S, F, T> SwitchLatest<S, F, T>
where
    S: Stream + Unpin,
    F: FnMut(S::Item) -> BoxStream<'static, T> + Unpin,
{
    pub(super) fn new(keys: S, subscribe: F) -> Self {
        Self { keys: Some(keys), inner: None, subscribe }
    }
}

impl<S, F, T> Stream for SwitchLatest<S, F, T>
where
    S: Stream + Unpin,
    F: FnMut(S::Item) -> BoxStream<'static, T> + Unpin,
{
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();

        while let Some(keys) = this.keys.as_mut() {
            match keys.poll_next_unpin(cx) {
                Poll::Ready(Some(key)) => {
                    let mut inner = (this.subscribe)(key);

                    match inner.poll_next_unpin(cx) {
                        Poll::Ready(Some(item)) => {
                            this.inner = Some(inner);
                            return Poll::Ready(Some(item));
                        }
                        Poll::Ready(None) => this.inner = None,
                        Poll::Pending => this.inner = Some(inner),
                    }
                }
                Poll::Ready(None) => this.keys = None,
                Poll::Pending => break,
            }
        }

        let Some(inner) = this.inner.as_mut() else {
            return if this.keys.is_none() { Poll::Ready(None) } else { Poll::Pending };
        };

        match inner.poll_next_unpin(cx) {
            Poll::Ready(Some(item)) => Poll::Ready(Some(item)),
            Poll::Ready(None) => {
                this.inner = None;

                if this.keys.is_none() { Poll::Ready(None) } else { Poll::Pending }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
