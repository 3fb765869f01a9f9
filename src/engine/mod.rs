//! Core engine: the route race, the two settlement legs and the gates
//! between them.

pub mod approval;
pub mod orchestrator;
pub mod poller;
pub mod profit;
pub mod report;
pub mod route_selector;
pub mod settlement;
pub mod treasury;
pub mod trigger;
