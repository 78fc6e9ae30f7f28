mod machine;
mod types;


pub use machine::SessionStateMachine;
pub use types::{
    Session, SessionCommand, SessionFrame, SessionSetup, SessionStatus, Transition,
};
