//! Authentication gate

use async_trait::async_trait;
use tracing::debug;

use super::{Gate, GateContext, LOGIN_ROUTE, Outcome, found};
use crate::flash::FlashMessages;

pub const LOGIN_REQUIRED_MESSAGE: &str = "Please log in to access this page.";

/// Sends anonymous visitors to the login page, remembering where they were going
#[derive(Debug, Clone, Default)]
pub struct AuthGate;

#[async_trait]
impl Gate for AuthGate {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn handle(&self, ctx: &GateContext) -> Outcome {
        if ctx.principal.is_authenticated() {
            return Outcome::Continue;
        }

        let intended = ctx.request.path_and_query();
        debug!(uri = %intended, "Unauthenticated request, redirecting to login");

        ctx.session
            .update(|data| data.intended_url = Some(intended))
            .await;
        FlashMessages::add_error(&ctx.session, LOGIN_REQUIRED_MESSAGE).await;

        Outcome::Halt(found(LOGIN_ROUTE))
    }
}
