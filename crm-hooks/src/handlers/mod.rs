mod app;
mod contacts;
mod webhook;

pub use app::{app, AppState, SOLUTION_NAME};
