//! Use-case services for the task board screen.
//!
//! # Responsibility
//! - Turn user intents into store writes (`TaskService`).
//! - Hold the screen state a rendering surface draws (`TaskBoard`).

pub mod board;
pub mod task_service;
