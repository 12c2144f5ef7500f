use serde::Deserialize;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub project_type: String,
    #[serde(default)]
    pub description: String,
}

pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

pub fn format_order_message(order: &OrderRequest) -> String {
    format!(
        "📩 *New Graphic Design Request*\n\
         👤 *Name:* {}\n\
         📧 *Email:* {}\n\
         🎨 *Project Type:* {}\n\
         📝 *Description:*\n{}",
        escape_markdown(order.name.trim()),
        escape_markdown(order.email.trim()),
        escape_markdown(order.project_type.trim()),
        escape_markdown(order.description.trim()),
    )
}

#[derive(Clone)]
pub struct OrderNotifier {
    bot: Option<Bot>,
    admin_chat_id: Option<ChatId>,
}

impl OrderNotifier {
    pub fn new(bot: Option<Bot>, admin_chat_id: Option<ChatId>) -> Self {
        OrderNotifier { bot, admin_chat_id }
    }

    pub fn disabled() -> Self {
        OrderNotifier {
            bot: None,
            admin_chat_id: None,
        }
    }

    pub fn notify(&self, order: OrderRequest) -> bool {
        let (Some(bot), Some(chat_id)) = (self.bot.clone(), self.admin_chat_id) else {
            warn!(
                "Order from {} not relayed: bot token or admin chat id missing",
                order.email
            );
            return false;
        };

        let text = format_order_message(&order);
        tokio::spawn(async move {
            match bot
                .send_message(chat_id, text)
                .parse_mode(ParseMode::Markdown)
                .await
            {
                Ok(_) => info!("Order notification sent for {}", order.email),
                Err(err) => warn!("Order notification for {} failed: {err}", order.email),
            }
        });
        true
    }
}
