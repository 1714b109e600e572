pub mod binder;
pub mod events;
pub mod history;
pub mod room;
pub mod scoring;
mod server;

pub use server::QuizServer;
