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

//! Reconciliation of displayed notifications with the notification state of
//! the signed-in user.
//!
//! A [`NotificationSource`] publishes, per user, snapshots of every
//! conversation that should currently be visible. The
//! [`NotificationReconciler`] follows the signed-in identity, switches to the
//! snapshots of the latest one and folds them into [`NotificationDiff`]s. A
//! diff holds the snapshot that was displayed before and the one that should be
//! displayed now; [`NotificationDiff::operations()`] turns it into the minimal
//! set of show, update and cancel operations, and [`present()`] applies them
//! to a [`NotificationSurface`].
//!
//! Signing out is an explicit transition: an identity of `None` yields an
//! empty snapshot, so whatever was shown for the previous identity is
//! cancelled.

mod reconciler;
mod switch;

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

pub use reconciler::{
    CallNotification, CallOp, IncomingCall, NotificationReconciler, NotificationSource,
};
use serde::{Deserialize, Serialize};

use crate::{ConversationId, UserId};

/// A single message line of a conversation notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    /// The id of the message.
    pub id: String,
    /// The display name of the sender.
    pub sender: String,
    /// The message text, as it should be displayed.
    pub text: String,
}

/// Everything that should currently be visible for one conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationNotification {
    /// The conversation the notification belongs to.
    pub conversation_id: ConversationId,
    /// The conversation title.
    pub title: String,
    /// The unread messages, oldest first.
    pub messages: Vec<NotificationMessage>,
}

/// What to do with one conversation's notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotificationOp {
    /// Show a notification that isn't displayed yet.
    Show(ConversationNotification),
    /// Replace the content of a displayed notification.
    Update(ConversationNotification),
    /// Remove a displayed notification.
    Cancel(ConversationId),
}

/// Two consecutive notification snapshots and the identity the newer one
/// belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationDiff {
    /// The snapshot that was displayed so far.
    pub previous: Arc<[ConversationNotification]>,
    /// The snapshot that should be displayed now.
    pub current: Arc<[ConversationNotification]>,
    /// The identity `current` belongs to, `None` when nobody is signed in.
    pub identity: Option<UserId>,
}

impl NotificationDiff {
    /// The operations that turn a display showing `previous` into one showing
    /// `current`.
    ///
    /// Cancellations come first, followed by shows and updates in the order of
    /// `current`. Conversations that didn't change produce no operation.
    pub fn operations(&self) -> Vec<NotificationOp> {
        let current_ids: HashSet<&ConversationId> =
            self.current.iter().map(|notification| &notification.conversation_id).collect();
        let previous: HashMap<&ConversationId, &ConversationNotification> = self
            .previous
            .iter()
            .map(|notification| (&notification.conversation_id, notification))
            .collect();

        let mut operations: Vec<NotificationOp> = self
            .previous
            .iter()
            .filter(|notification| !current_ids.contains(&notification.conversation_id))
            .map(|notification| NotificationOp::Cancel(notification.conversation_id.clone()))
            .collect();

        for notification in self.current.iter() {
            match previous.get(&notification.conversation_id) {
                None => operations.push(NotificationOp::Show(notification.clone())),
                Some(&shown) if shown != notification => {
                    operations.push(NotificationOp::Update(notification.clone()))
                }
                Some(_) => {}
            }
        }

        operations
    }

    /// Did anything change between the two snapshots.
    pub fn is_empty(&self) -> bool {
        self.operations().is_empty()
    }
}

/// The platform surface notifications are displayed on.
pub trait NotificationSurface {
    /// Display a new notification.
    fn show(&mut self, notification: &ConversationNotification);

    /// Replace a displayed notification.
    fn update(&mut self, notification: &ConversationNotification);

    /// Remove the notification of a conversation.
    fn cancel(&mut self, conversation_id: &ConversationId);
}

/// Apply a diff to a notification surface.
pub fn present<S: NotificationSurface + ?Sized>(surface: &mut S, diff: &NotificationDiff) {
    for operation in diff.operations() {
        match operation {
            NotificationOp::Show(notification) => surface.show(&notification),
            NotificationOp::Update(notification) => surface.update(&notification),
            NotificationOp::Cancel(conversation_id) => surface.cancel(&conversation_id),
        }
    }
}
