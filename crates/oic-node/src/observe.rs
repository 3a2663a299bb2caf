use oic_codec::message::{MessageV1, ResponseMessage};
use oic_core::header::validate_header_options;
use oic_core::query::QueryParams;
use oic_core::types::next_sequence;
use oic_core::{HandlerFlags, Method, ObservationId, OicError, QualityOfService, Token};
use oic_transport::adapter::TransportAdapter;
use tracing::{debug, warn};

use crate::handler::{Request, Response};
use crate::outbound::send_message;
use crate::server::{representation_payload, require_server};
use crate::state::{NodeState, Observer, ResourceEntry, ResourceHandle};

/// Adds an observer, reusing the id of an identical (host, token)
/// registration. `None` when the resource is full.
pub fn add_observer(
    entry: &mut ResourceEntry,
    host: &str,
    token: Token,
    qos: QualityOfService,
    max_observers: usize,
) -> Option<ObservationId> {
    if let Some(existing) = entry
        .observers
        .iter()
        .find(|o| o.host == host && o.token == token)
    {
        return Some(existing.id);
    }
    if entry.observers.len() >= max_observers {
        warn!(uri = %entry.uri, max_observers, "observer limit reached");
        return None;
    }
    let id = (0..=ObservationId::MAX).find(|id| entry.observers.iter().all(|o| o.id != *id))?;
    entry.observers.push(Observer {
        id,
        host: host.to_string(),
        token,
        qos,
        unacked: 0,
    });
    debug!(uri = %entry.uri, observer = id, host = %host, "observer registered");
    Some(id)
}

pub fn remove_observer(entry: &mut ResourceEntry, host: &str, token: Token) -> Option<ObservationId> {
    let index = entry
        .observers
        .iter()
        .position(|o| o.host == host && o.token == token)?;
    let observer = entry.observers.remove(index);
    debug!(uri = %entry.uri, observer = observer.id, host = %host, "observer removed");
    Some(observer.id)
}

fn notification(observer: &Observer, sequence: Option<u32>, response: Response) -> MessageV1 {
    MessageV1::response(ResponseMessage {
        token: observer.token,
        code: response.response_code(Method::Get),
        sequence,
        header_options: response.header_options,
        new_resource_uri: None,
        payload: representation_payload(response.representation),
        confirmable: sequence.is_some() && observer.qos.is_confirmable(),
    })
}

/// High-QoS observers that left too many notifications unacknowledged.
fn unresponsive(observers: &[Observer], max_unacked: u32) -> Vec<ObservationId> {
    observers
        .iter()
        .filter(|o| o.qos.is_confirmable() && o.unacked >= max_unacked)
        .map(|o| o.id)
        .collect()
}

fn drop_unresponsive(entry: &mut ResourceEntry, max_unacked: u32) {
    for id in unresponsive(&entry.observers, max_unacked) {
        warn!(uri = %entry.uri, observer = id, "observer stopped acknowledging, removing");
        entry.observers.retain(|o| o.id != id);
    }
}

fn count_unacked(entry: &mut ResourceEntry, confirmed: &[ObservationId]) {
    for observer in entry.observers.iter_mut().filter(|o| confirmed.contains(&o.id)) {
        observer.unacked += 1;
    }
}

/// Re-runs the handler with a GET for every observer and sends each result
/// under one new sequence number. Observers whose GET fails are dropped
/// after receiving the error, and High-QoS observers past the unacked limit
/// are dropped without one. Returns the number of notifications sent.
pub fn notify_all_observers<A: TransportAdapter>(
    node: &mut NodeState,
    adapter: &mut A,
    handle: ResourceHandle,
) -> Result<usize, OicError> {
    require_server(node)?;
    let max_unacked = node.config.max_unacked_notifications;
    let entry = node
        .server
        .resources
        .get_mut(&handle)
        .ok_or(OicError::NoResource)?;
    drop_unresponsive(entry, max_unacked);
    if entry.observers.is_empty() {
        return Err(OicError::NoObservers);
    }
    entry.sequence = next_sequence(entry.sequence);
    let sequence = entry.sequence;

    let mut sent = 0;
    let mut failed = Vec::new();
    let mut confirmed = Vec::new();
    for observer in entry.observers.clone() {
        let request = Request {
            flags: HandlerFlags::REQUEST,
            method: Method::Get,
            query: QueryParams::new(),
            header_options: Vec::new(),
            resource: handle,
            token: observer.token,
            host: observer.host.clone(),
            payload: None,
            observation: None,
        };
        let Some(response) = (entry.handler)(&request) else {
            warn!(uri = %entry.uri, observer = observer.id, "entity handler returned no notification");
            continue;
        };
        let success = response.response_code(Method::Get).is_success();
        if !success {
            failed.push(observer.id);
        }
        let message = notification(&observer, success.then_some(sequence), response);
        match send_message(adapter, Some(&observer.host), &message) {
            Ok(()) => {
                sent += 1;
                if success && observer.qos.is_confirmable() {
                    confirmed.push(observer.id);
                }
            }
            Err(err) => warn!(host = %observer.host, error = %err, "failed to send notification"),
        }
    }
    entry.observers.retain(|o| !failed.contains(&o.id));
    count_unacked(entry, &confirmed);
    Ok(sent)
}

/// Sends `response` to the listed observers under one new sequence number.
pub fn notify_list_of_observers<A: TransportAdapter>(
    node: &mut NodeState,
    adapter: &mut A,
    handle: ResourceHandle,
    observer_ids: &[ObservationId],
    response: &Response,
) -> Result<usize, OicError> {
    require_server(node)?;
    if observer_ids.is_empty() {
        return Err(OicError::InvalidParam("observer id list is empty"));
    }
    validate_header_options(&response.header_options)?;
    let max_unacked = node.config.max_unacked_notifications;
    let entry = node
        .server
        .resources
        .get_mut(&handle)
        .ok_or(OicError::NoResource)?;
    drop_unresponsive(entry, max_unacked);
    let targets: Vec<Observer> = entry
        .observers
        .iter()
        .filter(|o| observer_ids.contains(&o.id))
        .cloned()
        .collect();
    if targets.is_empty() {
        return Err(OicError::NoObservers);
    }
    entry.sequence = next_sequence(entry.sequence);
    let sequence = entry.sequence;

    let mut sent = 0;
    let mut confirmed = Vec::new();
    for observer in targets {
        let message = notification(&observer, Some(sequence), response.clone());
        match send_message(adapter, Some(&observer.host), &message) {
            Ok(()) => {
                sent += 1;
                if observer.qos.is_confirmable() {
                    confirmed.push(observer.id);
                }
            }
            Err(err) => warn!(host = %observer.host, error = %err, "failed to send notification"),
        }
    }
    count_unacked(entry, &confirmed);
    Ok(sent)
}
