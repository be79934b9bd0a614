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

use std::sync::Arc;

use futures::{
    Stream, StreamExt, future,
    stream::{self, BoxStream},
};
use tracing::{debug, trace};

use super::{ConversationNotification, NotificationDiff, switch::SwitchLatest};
use crate::{ConversationId, UserId};

/// Publishes the notification state of a user.
pub trait NotificationSource: Send + Sync + 'static {
    /// Snapshots of every conversation of `identity` that should currently be
    /// visible, one whenever something changes.
    fn message_notifications(
        &self,
        identity: &UserId,
    ) -> BoxStream<'static, Vec<ConversationNotification>>;

    /// The calls currently ringing for `identity`, one list whenever something
    /// changes.
    fn incoming_calls(&self, identity: &UserId) -> BoxStream<'static, Vec<IncomingCall>>;
}

/// A call waiting to be answered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingCall {
    /// The conversation the call was started in.
    pub conversation_id: ConversationId,
    /// The display name of the caller.
    pub caller: String,
}

/// What to do with the incoming call notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallOp {
    /// Show, or switch the notification to, the given call.
    Show(IncomingCall),
    /// Nothing is ringing, hide the notification.
    Hide,
}

/// A change of the incoming call notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallNotification {
    /// The identity the call belongs to.
    pub identity: Option<UserId>,
    /// The change.
    pub op: CallOp,
}

/// The two most recent snapshots.
struct NotificationWindow {
    current: Arc<[ConversationNotification]>,
}

impl Default for NotificationWindow {
    fn default() -> Self {
        Self { current: Vec::new().into() }
    }
}

impl NotificationWindow {
    fn advance(
        &mut self,
        identity: Option<UserId>,
        snapshot: Vec<ConversationNotification>,
    ) -> NotificationDiff {
        let current: Arc<[ConversationNotification]> = snapshot.into();
        let previous = std::mem::replace(&mut self.current, Arc::clone(&current));

        NotificationDiff { previous, current, identity }
    }
}

/// Turns the notification state of the signed-in user into diffs for the
/// notification surface.
pub struct NotificationReconciler<Src> {
    source: Arc<Src>,
}

impl<Src> Clone for NotificationReconciler<Src> {
    fn clone(&self) -> Self {
        Self { source: Arc::clone(&self.source) }
    }
}

impl<Src: NotificationSource> NotificationReconciler<Src> {
    /// Create a reconciler reading from the given source.
    pub fn new(source: Src) -> Self {
        Self { source: Arc::new(source) }
    }

    /// Create a reconciler reading from a shared source.
    pub fn from_shared(source: Arc<Src>) -> Self {
        Self { source }
    }

    /// Follow the signed-in identity and diff its message notifications.
    ///
    /// `identities` yields the signed-in identity whenever it changes, `None`
    /// after signing out. Each identity replaces the subscription of the
    /// previous one. `None` yields a single empty snapshot, even when the next
    /// identity is already queued behind it. The first diff has an empty
    /// `previous` snapshot.
    pub fn observe_messages<I>(
        &self,
        identities: I,
    ) -> impl Stream<Item = NotificationDiff> + Send + 'static
    where
        I: Stream<Item = Option<UserId>> + Unpin + Send + 'static,
    {
        let source = Arc::clone(&self.source);

        let subscribe = move |identity: Option<UserId>| match identity {
            Some(identity) => {
                debug!(%identity, "Subscribing to message notifications");

                source
                    .message_notifications(&identity)
                    .map(move |snapshot| (Some(identity.clone()), snapshot))
                    .boxed()
            }
            None => {
                debug!("No identity, clearing message notifications");
                stream::once(future::ready((None, Vec::new()))).boxed()
            }
        };

        let snapshots = SwitchLatest::new(identities, subscribe);

        let mut window = NotificationWindow::default();

        snapshots.map(move |(identity, snapshot)| {
            let diff = window.advance(identity, snapshot);
            trace!(
                previous = diff.previous.len(),
                current = diff.current.len(),
                "New notification snapshot"
            );

            diff
        })
    }

    /// Follow the signed-in identity and track the incoming call
    /// notification.
    ///
    /// Shows the first ringing call of the current identity, hides the
    /// notification when nothing rings or nobody is signed in. Consecutive
    /// identical changes are suppressed.
    pub fn observe_calls<I>(
        &self,
        identities: I,
    ) -> impl Stream<Item = CallNotification> + Send + 'static
    where
        I: Stream<Item = Option<UserId>> + Unpin + Send + 'static,
    {
        let source = Arc::clone(&self.source);

        let subscribe = move |identity: Option<UserId>| match identity {
            Some(identity) => {
                debug!(%identity, "Subscribing to incoming calls");

                source
                    .incoming_calls(&identity)
                    .map(move |calls| CallNotification {
                        identity: Some(identity.clone()),
                        op: calls.into_iter().next().map_or(CallOp::Hide, CallOp::Show),
                    })
                    .boxed()
            }
            None => {
                let hide = CallNotification { identity: None, op: CallOp::Hide };
                stream::once(future::ready(hide)).boxed()
            }
        };

        let notifications = SwitchLatest::new(identities, subscribe);

        let mut last_op = None;

        notifications.filter_map(move |notification| {
            let changed = last_op.as_ref() != Some(&notification.op);

            if changed {
                last_op = Some(notification.op.clone());
            }

            future::ready(changed.then_some(notification))
        })
    }
}
