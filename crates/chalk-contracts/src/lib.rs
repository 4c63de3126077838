pub mod canvas;
pub mod chat;
pub mod events;
pub mod geometry;
pub mod history;
pub mod markup;
pub mod media;
pub mod models;
pub mod suggestion;
pub mod templates;
pub mod voice;
