//! Submits per-device ciphertexts to the service and reconciles local
//! state against the response (spec.md §4.5).

use std::sync::Arc;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::collaborators::{DeviceMessage, Dependencies};
use crate::error::SendError;
use crate::message_send::{MessageSend, ThreadRef};
use crate::outgoing_message::OutgoingMessage;
use crate::prekey_client::{AuthMode, RequestMaker, Transport};
use crate::session_establisher::SessionEstablisher;
use crate::storage::SendStore;

#[derive(Debug, Serialize)]
struct DeviceMessageWire {
    #[serde(rename = "type")]
    message_type: u32,
    #[serde(rename = "destinationDeviceId")]
    destination_device_id: u32,
    #[serde(rename = "destinationRegistrationId")]
    destination_registration_id: u32,
    content: String,
}

impl From<&DeviceMessage> for DeviceMessageWire {
    fn from(msg: &DeviceMessage) -> Self {
        Self {
            message_type: msg.message_type,
            destination_device_id: msg.destination_device_id,
            destination_registration_id: msg.destination_registration_id,
            content: base64::engine::general_purpose::STANDARD.encode(&msg.content),
        }
    }
}

#[derive(Debug, Serialize)]
struct PutMessagesBody {
    timestamp: i64,
    messages: Vec<DeviceMessageWire>,
    #[serde(skip_serializing_if = "Option::is_none")]
    online: Option<bool>,
}

/// `PUT /v1/messages/{address}`'s structured failure body (spec.md §6).
#[derive(Debug, Default, Deserialize)]
struct MismatchResponse {
    #[serde(default)]
    code: Option<String>,
    #[serde(default, rename = "extraDevices")]
    extra_devices: Vec<u32>,
    #[serde(default, rename = "missingDevices")]
    missing_devices: Vec<u32>,
    #[serde(default, rename = "staleDevices")]
    stale_devices: Vec<u32>,
}

fn parse_mismatch_body(body: &[u8]) -> MismatchResponse {
    serde_json::from_slice(body).unwrap_or_default()
}

/// Classified dispatch of a non-2xx `PUT /v1/messages/{address}` response,
/// threaded through `perform_send` so the reconciliation helpers only ever
/// run once per response (spec.md §4.5's status table).
enum Dispatch {
    UdAuthRejected,
    Unauthorized,
    NotFound,
    Mismatched(MismatchResponse),
    Stale(MismatchResponse),
    Other(u16),
}

fn classify(status: u16, auth: AuthMode, body: &[u8]) -> Dispatch {
    match status {
        401 if auth == AuthMode::UnidentifiedDelivery => Dispatch::UdAuthRejected,
        401 => Dispatch::Unauthorized,
        404 => Dispatch::NotFound,
        409 => Dispatch::Mismatched(parse_mismatch_body(body)),
        410 => Dispatch::Stale(parse_mismatch_body(body)),
        other => Dispatch::Other(other),
    }
}

/// Performs `PerformSend` and, when the caller drives it through `send`,
/// the outer `EnsureSessions` → `PerformSend` retry loop spec.md §4.5
/// describes. Generic over the `RequestMaker` used for message submission;
/// a `SessionEstablisher` of its own (possibly different) `RequestMaker`
/// type is passed in to `send` rather than owned, since the two HTTP
/// endpoints (`/v2/keys` vs `/v1/messages`) are independent collaborators
/// in spec.md §6.
pub struct SendExecutor<R: RequestMaker> {
    request_maker: R,
    store: Arc<SendStore>,
    dependencies: Arc<Dependencies>,
}

impl<R: RequestMaker> SendExecutor<R> {
    pub fn new(request_maker: R, store: Arc<SendStore>, dependencies: Arc<Dependencies>) -> Self {
        Self {
            request_maker,
            store,
            dependencies,
        }
    }

    /// The full retry loop: `EnsureSessions` → encrypt → `PerformSend`,
    /// re-driven on `RetryableNow`/`RetryableAfterReconciliation` until
    /// success, a permanent failure, or `remaining_attempts` is exhausted
    /// (spec.md §4.5 "Retry").
    pub async fn send<R2: RequestMaker>(
        &self,
        session_establisher: &SessionEstablisher<R2>,
        send: &mut MessageSend,
        message: &mut OutgoingMessage,
    ) -> Result<(), SendError> {
        loop {
            session_establisher
                .ensure_sessions(std::slice::from_mut(send), false)
                .await?;

            let device_messages = self.encrypt_pending(send).await?;

            match self.perform_send(send, message, device_messages).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    use crate::error::Retryability::*;
                    match err.retryable() {
                        Permanent | PermanentForNow => return Err(err),
                        RetryableAfterReconciliation | RetryableNow => {
                            if send.attempts_exhausted() {
                                return Err(SendError::RetriesExhausted {
                                    address: send.recipient.address.to_string(),
                                    last_error: err.to_string(),
                                });
                            }
                            send.consume_attempt();
                            if send.is_local_address
                                && matches!(
                                    err,
                                    SendError::MismatchedDevices { .. } | SendError::StaleDevices { .. }
                                )
                            {
                                send.force_websocket_retry_avoidance();
                            }
                            tracing::warn!(
                                error = %err,
                                remaining_attempts = send.remaining_attempts,
                                "retrying send after reconciliation"
                            );
                        }
                    }
                }
            }
        }
    }

    async fn encrypt_pending(&self, send: &MessageSend) -> Result<Vec<DeviceMessage>, SendError> {
        let mut messages = Vec::with_capacity(send.device_ids.len());
        for &device_id in &send.device_ids {
            messages.push(
                self.dependencies
                    .encryptor
                    .encrypt(&send.recipient, device_id)
                    .await?,
            );
        }
        Ok(messages)
    }

    /// `PerformSend(send, deviceMessages)` (spec.md §4.5), one HTTP
    /// attempt. An empty `device_messages` list is valid only for
    /// self-sync probes (spec.md §4.5: "the server response still informs
    /// whether linked devices exist"); any other empty fan-out means every
    /// candidate device was pruned earlier and there is nothing to submit,
    /// so the caller is expected not to invoke this with an empty list in
    /// that case — we only special-case the self-sync probe.
    pub async fn perform_send(
        &self,
        send: &mut MessageSend,
        message: &mut OutgoingMessage,
        device_messages: Vec<DeviceMessage>,
    ) -> Result<(), SendError> {
        let address = send.recipient.address.clone();
        let path = format!("/v1/messages/{address}");

        let use_ud = send.ud_sending_access.is_some() && !send.has_ud_auth_failed;
        let auth = if use_ud {
            AuthMode::UnidentifiedDelivery
        } else {
            AuthMode::Basic
        };
        let ud_key = send.ud_sending_access.map(|a| a.0);
        let transport = if send.has_websocket_send_failed {
            Transport::Rest
        } else {
            Transport::Websocket
        };

        let body = PutMessagesBody {
            timestamp: message.timestamp.timestamp_millis(),
            messages: device_messages.iter().map(DeviceMessageWire::from).collect(),
            online: None,
        };
        let body_bytes = serde_json::to_vec(&body)
            .map_err(|e| SendError::Internal(format!("failed to serialize message body: {e}")))?;

        let outcome = match self
            .request_maker
            .put(&path, body_bytes, auth, ud_key, transport)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                send.has_websocket_send_failed = true;
                return Err(err);
            }
        };

        if (200..300).contains(&outcome.status) {
            return self
                .handle_success(send, message, auth, device_messages.is_empty())
                .await;
        }

        match classify(outcome.status, auth, &outcome.body) {
            Dispatch::UdAuthRejected => {
                send.has_ud_auth_failed = true;
                Err(SendError::Transport("UD auth rejected on message submission".into()))
            }
            Dispatch::Unauthorized => Err(SendError::UnauthorizedDevice {
                address: address.to_string(),
            }),
            Dispatch::NotFound => self.fail_send_for_unregistered_recipient(send, message).await,
            Dispatch::Mismatched(resp) => {
                self.handle_mismatched_devices(send, &resp).await?;
                Err(SendError::MismatchedDevices {
                    address: address.to_string(),
                })
            }
            Dispatch::Stale(resp) => {
                self.handle_stale_devices(send, &resp).await?;
                Err(SendError::StaleDevices {
                    address: address.to_string(),
                })
            }
            Dispatch::Other(status) => Err(SendError::Transport(format!(
                "message submission failed with status {status}"
            ))),
        }
    }

    async fn handle_success(
        &self,
        send: &mut MessageSend,
        message: &mut OutgoingMessage,
        auth: AuthMode,
        was_empty_submission: bool,
    ) -> Result<(), SendError> {
        if send.is_local_address && was_empty_submission {
            self.dependencies.state_effects.clear_may_have_linked_devices();
        }

        let address = send.recipient.address.clone();
        let was_sent_by_ud = auth == AuthMode::UnidentifiedDelivery;
        send.recipient.mark_registered();
        let recipient = send.recipient.clone();

        self.store
            .write(move |txn| SendStore::save_recipient(txn, &recipient))
            .await?;

        message.mark_sent_to(address.clone(), was_sent_by_ud);
        self.dependencies.state_effects.notify_interaction(&address);
        Ok(())
    }

    /// `handleMismatchedDevices(resp, recipient)` (spec.md §4.5).
    async fn handle_mismatched_devices(
        &self,
        send: &mut MessageSend,
        resp: &MismatchResponse,
    ) -> Result<(), SendError> {
        tracing::debug!(code = ?resp.code, missing = ?resp.missing_devices, extra = ?resp.extra_devices, "reconciling mismatched devices");
        if !resp.missing_devices.is_empty() && send.is_local_address {
            self.dependencies.state_effects.set_may_have_linked_devices();
        }

        let account_id = send.recipient.account_id;
        let missing = resp.missing_devices.clone();
        let extra = resp.extra_devices.clone();

        let mut recipient = send.recipient.clone();
        recipient.add_devices(missing.iter().copied());
        recipient.remove_devices(extra.iter().copied());

        self.store
            .write({
                let recipient = recipient.clone();
                let extra = extra.clone();
                move |txn| {
                    SendStore::save_recipient(txn, &recipient)?;
                    for device_id in &extra {
                        SendStore::delete_session(txn, account_id, *device_id)?;
                    }
                    Ok(())
                }
            })
            .await?;

        send.recipient = recipient;
        send.device_ids.retain(|d| !extra.contains(d));
        for device_id in missing {
            if !send.device_ids.contains(&device_id) {
                send.device_ids.push(device_id);
            }
        }
        Ok(())
    }

    /// `handleStaleDevices(resp, recipient)` (spec.md §4.5). Device set
    /// membership is untouched — only the sessions are stale.
    async fn handle_stale_devices(
        &self,
        send: &mut MessageSend,
        resp: &MismatchResponse,
    ) -> Result<(), SendError> {
        tracing::debug!(code = ?resp.code, stale = ?resp.stale_devices, "deleting stale sessions");
        let account_id = send.recipient.account_id;
        let stale = resp.stale_devices.clone();
        self.store
            .write(move |txn| {
                for device_id in &stale {
                    SendStore::delete_session(txn, account_id, *device_id)?;
                }
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// `failSendForUnregisteredRecipient(send)` (spec.md §4.5).
    async fn fail_send_for_unregistered_recipient(
        &self,
        send: &mut MessageSend,
        message: &mut OutgoingMessage,
    ) -> Result<(), SendError> {
        let address = send.recipient.address.clone();
        let is_group = matches!(send.thread, ThreadRef::Group);

        if !message.is_sync_message && is_group {
            message.mark_skipped(address.clone());
            if send.recipient.registered {
                send.recipient.mark_unregistered();
                let recipient = send.recipient.clone();
                self.store
                    .write(move |txn| SendStore::save_recipient(txn, &recipient))
                    .await?;
            }
        }

        Err(SendError::NoSuchRecipient {
            address: address.to_string(),
            ignorable_for_groups: is_group,
        })
    }
}
