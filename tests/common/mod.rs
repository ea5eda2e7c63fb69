//! Endpoints shared by the integration tests.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::Deserialize;
use wsroute::{Endpoint, HandlerError, Json, Lifetime, MessageContext, MessageDispatcher, Router};

/// Ordered record of handled messages.
#[derive(Debug, Default)]
pub struct Journal(Mutex<Vec<String>>);

impl Journal {
    pub fn push(&self, entry: String) { self.0.lock().unwrap_or_else(PoisonError::into_inner).push(entry); }

    pub fn entries(&self) -> Vec<String> { self.0.lock().unwrap_or_else(PoisonError::into_inner).clone() }
}

pub struct Ping {
    journal: Arc<Journal>,
}

#[async_trait]
impl Endpoint for Ping {
    type Request = ();

    async fn handle(&self, ctx: &MessageContext<'_>, _request: ()) -> Result<(), HandlerError> {
        self.journal.push(format!("{}:{}", ctx.route_key(), ctx.connection().id().as_u64()));
        Ok(())
    }
}

#[derive(Deserialize)]
pub struct Say {
    pub text: String,
}

pub struct Echo {
    journal: Arc<Journal>,
}

#[async_trait]
impl Endpoint for Echo {
    type Request = Json<Say>;

    async fn handle(&self, _ctx: &MessageContext<'_>, request: Json<Say>) -> Result<(), HandlerError> {
        if request.text.is_empty() {
            return Err("nothing to say".into());
        }
        self.journal.push(request.into_inner().text);
        Ok(())
    }
}

/// Router with `ping` and `echo` endpoints writing to `journal`.
pub fn router(journal: &Arc<Journal>) -> MessageDispatcher {
    Router::builder()
        .service_instance(Arc::clone(journal))
        .expect("journal service")
        .endpoint("ping", Lifetime::Scoped, |scope| {
            Ok(Ping {
                journal: Arc::clone(&*scope.resolve::<Arc<Journal>>()?),
            })
        })
        .expect("ping route")
        .endpoint("echo", Lifetime::Transient, |scope| {
            Ok(Echo {
                journal: Arc::clone(&*scope.resolve::<Arc<Journal>>()?),
            })
        })
        .expect("echo route")
        .build()
}
