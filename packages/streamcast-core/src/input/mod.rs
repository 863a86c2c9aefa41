//! Input controllers: path-routed event dispatch, cursor replication grace
//! policy, and keyboard key-release-on-disconnect.

pub mod controller;
pub mod event;
pub mod manager;

pub use controller::{Controller, GameController, KeyboardController, MouseController};
pub use event::{event_value_kind, split_controller_path, EventValueKind};
pub use manager::ControllerManager;
