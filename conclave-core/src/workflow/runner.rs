//! Request/response loop for responder roles

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::context::AgentContext;
use super::requests::{ErrorReport, TypedPayload};
use crate::agent::AgentRole;
use crate::broker::{Message, Payload};
use crate::wait::WaitOutcome;
use crate::Result;

/// A role that answers requests addressed to it
#[async_trait]
pub trait RoleHandler: Send {
    fn role(&self) -> AgentRole;

    /// Called before each wait for the next request
    fn on_waiting(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called after `handle` failed, to return to the idle phase
    fn on_failed(&mut self) {}

    /// Handle one request and produce the reply payload
    async fn handle(&mut self, ctx: &mut AgentContext, request: &Message) -> Result<Payload>;
}

/// Drives a [`RoleHandler`]: wait, handle, reply to the requester
///
/// Every request gets an answer. Handler errors are sent back as an
/// [`ErrorReport`] so the requester never waits on a silent failure.
/// A transport that keeps failing after the client's own retries is
/// reconnected up to `transport.reconnect_attempts` times in a row.
pub struct AgentRunner<H> {
    ctx: AgentContext,
    handler: H,
    cancel: CancellationToken,
}

impl<H: RoleHandler> AgentRunner<H> {
    pub fn new(ctx: AgentContext, handler: H) -> Self {
        Self {
            ctx,
            handler,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops [`AgentRunner::run`]; a request being handled finishes first
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Wait once and handle what arrives
    ///
    /// Returns the outcome of the wait; a handled request yields `Message`.
    pub async fn run_once(&mut self) -> Result<WaitOutcome> {
        self.handler.on_waiting()?;
        let outcome = self.ctx.next_message(&self.cancel).await?;
        if let WaitOutcome::Message(message) = &outcome {
            self.dispatch(message).await?;
        }
        Ok(outcome)
    }

    /// Serve requests until cancelled
    pub async fn run(mut self) -> Result<()> {
        info!(agent = %self.ctx.id(), role = %self.handler.role(), "Agent started");
        let transport = self.ctx.config().transport.clone();
        let idle_delay = self.ctx.config().workflow.idle_delay;
        let mut reconnects = 0;
        while !self.cancel.is_cancelled() {
            match self.run_once().await {
                Ok(WaitOutcome::Cancelled { .. }) => break,
                Ok(WaitOutcome::Timeout { attempts }) => {
                    reconnects = 0;
                    debug!(agent = %self.ctx.id(), attempts, "Still waiting for work");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(idle_delay) => {}
                    }
                }
                Ok(WaitOutcome::Message(_)) => reconnects = 0,
                Err(e) if e.is_retryable() && reconnects < transport.reconnect_attempts => {
                    reconnects += 1;
                    warn!(
                        agent = %self.ctx.id(),
                        error = %e,
                        attempt = reconnects,
                        max = transport.reconnect_attempts,
                        "Transport failed, reconnecting"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(transport.reconnect_delay) => {}
                    }
                    if let Err(e) = self.ctx.reconnect().await {
                        warn!(agent = %self.ctx.id(), error = %e, "Reconnect failed");
                    }
                }
                Err(e) => {
                    warn!(agent = %self.ctx.id(), error = %e, "Agent stopped on error");
                    return Err(e);
                }
            }
        }
        info!(agent = %self.ctx.id(), "Agent stopped");
        Ok(())
    }

    async fn dispatch(&mut self, message: &Message) -> Result<()> {
        if &message.sender == self.ctx.id() {
            return Ok(());
        }
        let Payload::Request(request) = &message.payload else {
            debug!(
                agent = %self.ctx.id(),
                sender = %message.sender,
                "Ignoring message that is not a request"
            );
            return Ok(());
        };
        let kind = request.kind.clone();

        info!(agent = %self.ctx.id(), sender = %message.sender, kind = %kind, "Handling request");
        let reply = match self.handler.handle(&mut self.ctx, message).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(agent = %self.ctx.id(), kind = %kind, error = %e, "Request failed");
                self.handler.on_failed();
                ErrorReport {
                    request: Some(kind),
                    message: e.to_string(),
                }
                .to_result()?
            }
        };

        if let Err(e) = self.ctx.reply(message, reply).await {
            if e.is_retryable() {
                return Err(e);
            }
            warn!(agent = %self.ctx.id(), to = %message.sender, error = %e, "Could not deliver reply");
        }
        Ok(())
    }
}
