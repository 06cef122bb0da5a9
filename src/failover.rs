//! Primary/fallback session establishment.
//!
//! A run is configured with a primary endpoint and, optionally, a fallback
//! endpoint in another region. [`SessionEstablisher::connect`] tries the
//! primary first and only builds the fallback when the primary cannot be
//! reached. The resulting [`FailoverSession`] forwards every request to
//! whichever of the two it ended up with.
//!
//! The choice is made once. If the active endpoint becomes unusable later,
//! requests fail against it; the session does not switch endpoints.

use crate::config::EndpointConfig;
use crate::errors::DriverError;
use crate::session::{Connector, QueryResults, Request, Session};
use async_trait::async_trait;
use derivative::Derivative;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};

/// The session a [`FailoverSession`] forwards to.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub enum Delegate<S> {
    /// The primary endpoint answered.
    Primary(#[derivative(Debug = "ignore")] S),
    /// The primary endpoint failed and the fallback answered.
    Fallback(#[derivative(Debug = "ignore")] S),
    /// No endpoint answered.
    None,
}

impl<S> Delegate<S> {
    /// The active session, if any.
    pub fn session(&self) -> Option<&S> {
        match self {
            Delegate::Primary(session) | Delegate::Fallback(session) => Some(session),
            Delegate::None => None,
        }
    }

    fn role(&self) -> &'static str {
        match self {
            Delegate::Primary(_) => "primary",
            Delegate::Fallback(_) => "fallback",
            Delegate::None => "none",
        }
    }
}

/// A session bound to the primary endpoint, or to the fallback when the
/// primary could not be reached at startup.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct FailoverSession<S> {
    delegate: Delegate<S>,
    endpoint: String,
    closed: AtomicBool,
}

impl<S> FailoverSession<S> {
    /// Wraps an already established delegate.
    ///
    /// [`SessionEstablisher::connect`] never produces [`Delegate::None`];
    /// wrapping one gives a session that rejects every request with
    /// [`DriverError::NoSessionAvailable`] and closes as a no-op.
    pub fn new<N: Into<String>>(delegate: Delegate<S>, endpoint: N) -> Self {
        Self {
            delegate,
            endpoint: endpoint.into(),
            closed: AtomicBool::new(false),
        }
    }

    /// The delegate requests go to.
    pub fn delegate(&self) -> &Delegate<S> {
        &self.delegate
    }

    /// The active session, if any.
    pub fn active(&self) -> Option<&S> {
        self.delegate.session()
    }

    /// Is the session running on the fallback endpoint?
    pub fn is_fallback(&self) -> bool {
        matches!(self.delegate, Delegate::Fallback(_))
    }

    /// Name of the endpoint in use.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Has `close` been called?
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: Session> Session for FailoverSession<S> {
    async fn execute(&self, request: &Request) -> Result<QueryResults, DriverError> {
        if self.is_closed() {
            return Err(DriverError::SessionClosed);
        }
        match self.active() {
            Some(session) => session.execute(request).await,
            None => Err(DriverError::NoSessionAvailable {
                primary: "not connected".to_string(),
                fallback: "not connected".to_string(),
            }),
        }
    }

    /// Close the active delegate.
    ///
    /// Never fails: a delegate that does not close cleanly is logged and
    /// left behind. Only the first call does anything.
    async fn close(&self) -> Result<(), DriverError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(session) = self.active() {
            debug!("closing {} session '{}'", self.delegate.role(), self.endpoint);
            if let Err(e) = session.close().await {
                warn!(
                    "failed to close {} session '{}': {}",
                    self.delegate.role(),
                    self.endpoint,
                    e
                );
            }
        }
        Ok(())
    }
}

/// Builds a [`FailoverSession`] from a primary and a fallback endpoint.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct SessionEstablisher<C> {
    #[derivative(Debug = "ignore")]
    connector: C,
}

impl<C: Connector> SessionEstablisher<C> {
    /// Creates a new establisher using `connector`.
    pub fn new(connector: C) -> Self {
        Self { connector }
    }

    /// The connector sessions are built with.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Connect to `primary`, or to `fallback` if the primary fails.
    ///
    /// Resolves once the primary succeeded or both attempts finished. When
    /// neither endpoint can be reached, returns
    /// [`DriverError::NoSessionAvailable`] with both causes.
    // TODO: supervise the active delegate and re-run establishment when it
    // stops answering, instead of failing every request against it.
    pub async fn connect(
        &self,
        primary: &EndpointConfig,
        fallback: Option<&EndpointConfig>,
    ) -> Result<FailoverSession<C::Session>, DriverError> {
        info!(
            "creating connection using '{}', fallback: '{}'",
            primary.name,
            fallback.map_or("<none>", |f| f.name.as_str())
        );
        let primary_err = match self.build(primary).await {
            Ok(session) => {
                info!("connected to primary '{}'", primary.name);
                return Ok(FailoverSession::new(
                    Delegate::Primary(session),
                    primary.name.clone(),
                ));
            }
            Err(e) => e,
        };
        let fallback = match fallback {
            Some(fallback) => fallback,
            None => {
                error!("failed to connect to '{}': {}", primary.name, primary_err);
                return Err(DriverError::NoSessionAvailable {
                    primary: primary_err.to_string(),
                    fallback: "not configured".to_string(),
                });
            }
        };
        warn!(
            "failed to connect to primary '{}', trying fallback '{}': {}",
            primary.name, fallback.name, primary_err
        );
        match self.build(fallback).await {
            Ok(session) => {
                info!("connected to fallback '{}'", fallback.name);
                Ok(FailoverSession::new(
                    Delegate::Fallback(session),
                    fallback.name.clone(),
                ))
            }
            Err(fallback_err) => {
                error!(
                    "failed to connect to fallback '{}': {}",
                    fallback.name, fallback_err
                );
                Err(DriverError::NoSessionAvailable {
                    primary: primary_err.to_string(),
                    fallback: fallback_err.to_string(),
                })
            }
        }
    }

    async fn build(&self, endpoint: &EndpointConfig) -> Result<C::Session, DriverError> {
        match tokio::time::timeout(endpoint.connect_timeout, self.connector.connect(endpoint)).await
        {
            Ok(result) => result,
            Err(_) => Err(DriverError::ConnectTimeout {
                endpoint: endpoint.name.clone(),
                timeout: endpoint.connect_timeout,
            }),
        }
    }
}
