use std::sync::Arc;

use log::{debug, info, warn};
use ws::{
    CloseCode, Error as WSError, ErrorKind as WSErrorKind, Request, Response, Result as WSResult,
};

use crate::auth::{make_challenge, verify_signature};
use crate::messages::{
    Dict, ErrorDetails, HelloDetails, Message, Reason, RouterRoles, WelcomeDetails, URI,
};
use crate::router::messaging::send_message;
use crate::{Error, ErrorKind, WampResult};

use super::{ConnectionHandler, ConnectionState, PendingAuth, WAMP_JSON, WAMP_MSGPACK};

impl ConnectionHandler {
    pub fn handle_hello(&mut self, realm: URI, details: HelloDetails) -> WampResult<()> {
        debug!("Responding to hello message (realm: {:?})", realm);
        let id = { self.info.lock().unwrap().id };

        let realm_handle = self.set_realm(realm.uri.clone())?;

        let auth_provider = realm_handle.lock().unwrap().auth_provider.clone();
        match auth_provider {
            Some(provider) => {
                let authid = details.authid.clone().unwrap_or_default();
                let credentials = match provider.lookup(&authid) {
                    Some(c) => c,
                    None => {
                        return Err(Error::new(ErrorKind::AuthFailed(format!(
                            "no such authid: {}",
                            authid
                        ))))
                    }
                };
                let (challenge, key) = make_challenge(id, &authid, &credentials)?;
                {
                    let mut info = self.info.lock().unwrap();
                    info.state = ConnectionState::Authenticating;
                    info.pending_auth = Some(PendingAuth {
                        realm: realm.uri,
                        authid,
                        challenge: challenge.clone(),
                        key,
                    });
                }
                let mut extra = Dict::new();
                extra.insert(
                    "challenge".to_string(),
                    crate::Value::String(challenge),
                );
                send_message(
                    &self.info,
                    &Message::Challenge("wampcra".to_string(), extra),
                )
            }
            None => {
                {
                    let mut info = self.info.lock().unwrap();
                    info.state = ConnectionState::Connected;
                }
                send_message(
                    &self.info,
                    &Message::Welcome(id, WelcomeDetails::new(RouterRoles::new())),
                )
            }
        }
    }

    pub fn handle_authenticate(&mut self, signature: String, _extra: Dict) -> WampResult<()> {
        let (id, pending) = {
            let mut info = self.info.lock().unwrap();
            match info.state {
                ConnectionState::Authenticating => {}
                _ => {
                    return Err(Error::new(ErrorKind::ProtocolViolation(
                        "AUTHENTICATE received outside an authentication handshake".to_string(),
                    )))
                }
            }
            let pending = info.pending_auth.take().ok_or_else(|| {
                Error::new(ErrorKind::ProtocolViolation(
                    "AUTHENTICATE received with no pending challenge".to_string(),
                ))
            })?;
            (info.id, pending)
        };

        if verify_signature(&pending.key, &pending.challenge, &signature) {
            info!("Session {} authenticated as {}", id, pending.authid);
            {
                let mut info = self.info.lock().unwrap();
                info.state = ConnectionState::Connected;
            }
            send_message(
                &self.info,
                &Message::Welcome(id, WelcomeDetails::new(RouterRoles::new())),
            )
        } else {
            warn!("Authentication failed for authid {}", pending.authid);
            Err(Error::new(ErrorKind::AuthFailed(format!(
                "bad signature for authid {}",
                pending.authid
            ))))
        }
    }

    pub fn handle_goodbye(&mut self, _details: ErrorDetails, reason: Reason) -> WampResult<()> {
        let state = self.info.lock().unwrap().state.clone();
        match state {
            ConnectionState::Initializing | ConnectionState::Authenticating => {
                Err(Error::new(ErrorKind::InvalidState(
                    "Received a goodbye message before handshake complete",
                )))
            }
            ConnectionState::Connected => {
                info!("Received goodbye message with reason: {:?}", reason);
                self.remove();
                send_message(
                    &self.info,
                    &Message::Goodbye(ErrorDetails::new(), Reason::GoodbyeAndOut),
                )
                .ok();
                let mut info = self.info.lock().unwrap();
                info.state = ConnectionState::Disconnected;
                match info.sender.close(CloseCode::Normal) {
                    Err(e) => Err(Error::new(ErrorKind::WSError(e))),
                    _ => Ok(()),
                }
            }
            ConnectionState::ShuttingDown => {
                info!(
                    "Received goodbye message in response to our goodbye message with reason: {:?}",
                    reason
                );
                let mut info = self.info.lock().unwrap();
                info.state = ConnectionState::Disconnected;
                match info.sender.close(CloseCode::Normal) {
                    Err(e) => Err(Error::new(ErrorKind::WSError(e))),
                    _ => Ok(()),
                }
            }
            ConnectionState::Disconnected => {
                warn!("Received goodbye message after closing connection");
                Ok(())
            }
        }
    }

    fn set_realm(&mut self, realm: String) -> WampResult<Arc<std::sync::Mutex<super::Realm>>> {
        debug!("Setting realm to {}", realm);
        if let Some(realm) = self.router.realms.lock().unwrap().get(&realm) {
            {
                realm
                    .lock()
                    .unwrap()
                    .connections
                    .push(Arc::clone(&self.info));
            }
            self.realm = Some(Arc::clone(realm));
            Ok(Arc::clone(realm))
        } else {
            Err(Error::new(ErrorKind::HandshakeError(Reason::NoSuchRealm)))
        }
    }

    pub fn process_protocol(&mut self, request: &Request, response: &mut Response) -> WSResult<()> {
        debug!("Checking protocol");
        let protocols = request.protocols()?;
        for protocol in protocols {
            if protocol == WAMP_JSON || protocol == WAMP_MSGPACK {
                response.set_protocol(protocol);
                let mut info = self.info.lock().unwrap();
                info.protocol = protocol.to_string();
                return Ok(());
            }
        }
        Err(WSError::new(
            WSErrorKind::Protocol,
            format!(
                "Neither {} nor {} were selected as Websocket sub-protocols",
                WAMP_JSON, WAMP_MSGPACK
            ),
        ))
    }
}
