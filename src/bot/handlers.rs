use teloxide::prelude::*;
use tracing::{info, warn};

use super::menu::{contact_forward_text, main_menu_keyboard, resolve};
use super::{BotState, HandlerResult};

pub async fn handle_text(bot: Bot, state: BotState, message: Message) -> HandlerResult {
    let text = message.text().unwrap_or_default();
    let action = resolve(text);
    info!("Chat {} asked for {action:?}", message.chat.id);

    let reply = state.content.reply(action);
    let mut request = bot.send_message(message.chat.id, reply.text);
    if let Some(markup) = reply.markup {
        request = request.reply_markup(markup);
    }
    request.await?;
    Ok(())
}

pub async fn handle_contact(bot: Bot, state: BotState, message: Message) -> HandlerResult {
    let Some(contact) = message.contact() else {
        return Ok(());
    };

    bot.send_message(message.chat.id, state.content.contact_ack(&contact.first_name))
        .reply_markup(main_menu_keyboard())
        .await?;

    let Some(admin_chat_id) = state.admin_chat_id else {
        warn!(
            "Contact from chat {} not forwarded: admin chat id missing",
            message.chat.id
        );
        return Ok(());
    };

    let username = message
        .from
        .as_ref()
        .and_then(|user| user.username.as_deref());
    let text = contact_forward_text(
        &contact.first_name,
        contact.last_name.as_deref(),
        &contact.phone_number,
        username,
    );
    match bot.send_message(admin_chat_id, text).await {
        Ok(_) => info!("Forwarded contact from chat {} to admin", message.chat.id),
        Err(err) => warn!("Forwarding contact to admin failed: {err}"),
    }
    Ok(())
}

pub async fn ignore_message() -> HandlerResult {
    Ok(())
}
