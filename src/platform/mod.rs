pub mod telegram;

pub use telegram::TelegramReceiver;
