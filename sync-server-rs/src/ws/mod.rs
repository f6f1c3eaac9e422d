pub mod agent_registry;
pub mod ui;
