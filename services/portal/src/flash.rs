//! Flash messages carried across a redirect

use crate::models::{FlashLevel, FlashMessage};
use crate::session::Session;

pub struct FlashMessages;

impl FlashMessages {
    pub async fn add(session: &Session, level: FlashLevel, text: impl Into<String>) {
        let message = FlashMessage {
            level,
            text: text.into(),
        };
        session.update(|data| data.flash.push(message)).await;
    }

    pub async fn add_error(session: &Session, text: impl Into<String>) {
        Self::add(session, FlashLevel::Error, text).await;
    }

    pub async fn add_success(session: &Session, text: impl Into<String>) {
        Self::add(session, FlashLevel::Success, text).await;
    }

    pub async fn add_info(session: &Session, text: impl Into<String>) {
        Self::add(session, FlashLevel::Info, text).await;
    }

    /// Take every queued message; each is shown once
    pub async fn take_all(session: &Session) -> Vec<FlashMessage> {
        if session.read(|data| data.flash.is_empty()).await {
            return Vec::new();
        }
        session.update(|data| std::mem::take(&mut data.flash)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_messages_are_drained_in_order() {
        let session = Session::fresh();
        FlashMessages::add_error(&session, "first").await;
        FlashMessages::add_success(&session, "second").await;
        FlashMessages::add_info(&session, "third").await;

        let messages = FlashMessages::take_all(&session).await;
        let levels: Vec<FlashLevel> = messages.iter().map(|m| m.level).collect();
        assert_eq!(
            levels,
            vec![FlashLevel::Error, FlashLevel::Success, FlashLevel::Info]
        );
        assert_eq!(messages[0].text, "first");
        assert!(FlashMessages::take_all(&session).await.is_empty());
    }
}
