use teloxide::types::{
    ButtonRequest, InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup,
    ReplyMarkup,
};
use teloxide::utils::command::BotCommands;
use url::Url;

use super::Command;
use crate::config::BotContentConfig;

pub const BTN_PORTFOLIO: &str = "🎨 Portfolio";
pub const BTN_SERVICES: &str = "💼 Services";
pub const BTN_PRICING: &str = "💰 Pricing";
pub const BTN_ORDER: &str = "📝 Order a design";
pub const BTN_CONTACT: &str = "📞 Contact";
pub const BTN_SOCIAL: &str = "🌐 Social";
pub const BTN_SHARE_CONTACT: &str = "📱 Share my contact";
pub const BTN_BACK: &str = "⬅️ Back to menu";

const SERVICES_TEXT: &str = "💼 Services\n\n\
• Logo and brand identity\n\
• Social media graphics and templates\n\
• Posters, flyers and banners\n\
• Packaging and label design\n\
• Business cards and print materials\n\
• Presentation and pitch deck design\n\n\
Tap \"📝 Order a design\" to start a project.";

const PRICING_TEXT: &str = "💰 Pricing (starting from)\n\n\
• Logo: $50\n\
• Brand identity kit: $150\n\
• Social media pack (5 posts): $40\n\
• Poster or flyer: $30\n\
• Packaging design: $120\n\n\
Every project is quoted individually once the brief is clear.";

const FALLBACK_TEXT: &str = "🤔 Sorry, I didn't understand that.\n\
Use /help to see the commands or pick an option from the menu below.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    Start,
    Help,
    Contact,
    Portfolio,
    Services,
    Pricing,
    Social,
    Order,
    BackToMenu,
    Unknown,
}

impl From<Command> for MenuAction {
    fn from(command: Command) -> Self {
        match command {
            Command::Start => MenuAction::Start,
            Command::Help => MenuAction::Help,
            Command::Contact => MenuAction::Contact,
            Command::Portfolio => MenuAction::Portfolio,
            Command::Services => MenuAction::Services,
            Command::Pricing => MenuAction::Pricing,
            Command::Social => MenuAction::Social,
        }
    }
}

const BUTTON_ACTIONS: [(&str, MenuAction); 7] = [
    (BTN_PORTFOLIO, MenuAction::Portfolio),
    (BTN_SERVICES, MenuAction::Services),
    (BTN_PRICING, MenuAction::Pricing),
    (BTN_ORDER, MenuAction::Order),
    (BTN_CONTACT, MenuAction::Contact),
    (BTN_SOCIAL, MenuAction::Social),
    (BTN_BACK, MenuAction::BackToMenu),
];

fn normalize_label(text: &str) -> String {
    text.trim()
        .trim_start_matches(|ch: char| !ch.is_alphanumeric())
        .trim()
        .to_lowercase()
}

fn resolve_command(text: &str) -> MenuAction {
    let token = text
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_start_matches('/');
    let name = token.split('@').next().unwrap_or_default().to_lowercase();
    if name == "hello" {
        return MenuAction::Start;
    }
    Command::parse(&format!("/{name}"), "")
        .map(MenuAction::from)
        .unwrap_or(MenuAction::Unknown)
}

pub fn resolve(text: &str) -> MenuAction {
    let trimmed = text.trim();
    if trimmed.starts_with('/') {
        return resolve_command(trimmed);
    }

    let normalized = normalize_label(trimmed);
    if normalized.is_empty() {
        return MenuAction::Unknown;
    }
    BUTTON_ACTIONS
        .iter()
        .find(|(label, _)| normalize_label(label) == normalized)
        .map(|(_, action)| *action)
        .unwrap_or(MenuAction::Unknown)
}

#[derive(Debug, Clone)]
pub struct BotReply {
    pub text: String,
    pub markup: Option<ReplyMarkup>,
}

impl BotReply {
    fn with_markup(text: String, markup: impl Into<ReplyMarkup>) -> Self {
        BotReply {
            text,
            markup: Some(markup.into()),
        }
    }
}

pub fn main_menu_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![KeyboardButton::new(BTN_PORTFOLIO), KeyboardButton::new(BTN_SERVICES)],
        vec![KeyboardButton::new(BTN_PRICING), KeyboardButton::new(BTN_ORDER)],
        vec![KeyboardButton::new(BTN_CONTACT), KeyboardButton::new(BTN_SOCIAL)],
    ])
    .resize_keyboard()
}

fn contact_keyboard() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![KeyboardButton::new(BTN_SHARE_CONTACT).request(ButtonRequest::Contact)],
        vec![KeyboardButton::new(BTN_BACK)],
    ])
    .resize_keyboard()
}

fn url_button(label: &str, link: &str) -> Option<InlineKeyboardButton> {
    let parsed = Url::parse(link.trim()).ok()?;
    Some(InlineKeyboardButton::url(label, parsed))
}

#[derive(Debug, Clone)]
pub struct BotContent {
    config: BotContentConfig,
}

impl BotContent {
    pub fn new(config: BotContentConfig) -> Self {
        BotContent { config }
    }

    fn welcome_text(&self) -> String {
        format!(
            "👋 Hello! Welcome to the design bot of {}.\n\n\
             I can show you the portfolio, explain services and prices, \
             or help you get in touch. Pick an option below.",
            self.config.designer_name
        )
    }

    fn help_text(&self) -> String {
        format!(
            "{}\n\nYou can also use the menu buttons at the bottom of the chat.",
            Command::descriptions()
        )
    }

    fn contact_text(&self) -> String {
        let mut lines = vec!["📞 Get in touch".to_string(), String::new()];
        if !self.config.contact_email.trim().is_empty() {
            lines.push(format!("Email: {}", self.config.contact_email.trim()));
        }
        if !self.config.contact_phone.trim().is_empty() {
            lines.push(format!("Phone: {}", self.config.contact_phone.trim()));
        }
        lines.push(format!(
            "Or tap \"{BTN_SHARE_CONTACT}\" below and you will get a reply shortly."
        ));
        lines.join("\n")
    }

    fn portfolio_reply(&self) -> BotReply {
        let text = format!(
            "🎨 The latest work is in the online portfolio:\n{}",
            self.config.portfolio_url
        );
        match url_button("Open portfolio", &self.config.portfolio_url) {
            Some(button) => {
                BotReply::with_markup(text, InlineKeyboardMarkup::new(vec![vec![button]]))
            }
            None => BotReply::with_markup(text, main_menu_keyboard()),
        }
    }

    fn social_reply(&self) -> BotReply {
        let buttons: Vec<Vec<InlineKeyboardButton>> = [
            ("Instagram", self.config.instagram_url.as_str()),
            ("Behance", self.config.behance_url.as_str()),
            ("Website", self.config.portfolio_url.as_str()),
        ]
        .iter()
        .filter_map(|(label, link)| url_button(label, link))
        .map(|button| vec![button])
        .collect();

        if buttons.is_empty() {
            return BotReply::with_markup(
                "🌐 Social links are coming soon.".to_string(),
                main_menu_keyboard(),
            );
        }
        BotReply::with_markup(
            "🌐 Follow the work on social media:".to_string(),
            InlineKeyboardMarkup::new(buttons),
        )
    }

    fn order_text(&self) -> String {
        format!(
            "📝 To order a design, fill in the order form at {} \
             with your name, email, project type and a short description.\n\n\
             Prefer a call? Tap \"{BTN_CONTACT}\" and share your number.",
            self.config.portfolio_url
        )
    }

    pub fn reply(&self, action: MenuAction) -> BotReply {
        match action {
            MenuAction::Start | MenuAction::BackToMenu => {
                BotReply::with_markup(self.welcome_text(), main_menu_keyboard())
            }
            MenuAction::Help => BotReply::with_markup(self.help_text(), main_menu_keyboard()),
            MenuAction::Contact => BotReply::with_markup(self.contact_text(), contact_keyboard()),
            MenuAction::Portfolio => self.portfolio_reply(),
            MenuAction::Services => {
                BotReply::with_markup(SERVICES_TEXT.to_string(), main_menu_keyboard())
            }
            MenuAction::Pricing => {
                BotReply::with_markup(PRICING_TEXT.to_string(), main_menu_keyboard())
            }
            MenuAction::Social => self.social_reply(),
            MenuAction::Order => BotReply::with_markup(self.order_text(), main_menu_keyboard()),
            MenuAction::Unknown => {
                BotReply::with_markup(FALLBACK_TEXT.to_string(), main_menu_keyboard())
            }
        }
    }

    pub fn contact_ack(&self, first_name: &str) -> String {
        format!(
            "✅ Thanks, {}! Your contact has been passed on and you will be contacted soon.",
            first_name.trim()
        )
    }
}

pub fn contact_forward_text(
    first_name: &str,
    last_name: Option<&str>,
    phone_number: &str,
    username: Option<&str>,
) -> String {
    let full_name = match last_name.map(str::trim).filter(|name| !name.is_empty()) {
        Some(last) => format!("{} {}", first_name.trim(), last),
        None => first_name.trim().to_string(),
    };
    let mut text = format!("📱 New contact shared\n👤 Name: {full_name}\n📞 Phone: {phone_number}");
    if let Some(username) = username.filter(|name| !name.is_empty()) {
        text.push_str(&format!("\n💬 Telegram: @{username}"));
    }
    text
}
