use crate::store::SessionData;
use crate::types::message::UserId;
use crate::types::user::MatchSummary;

// Enum defining all possible commands to modify the session state.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    SetCredential(Option<String>),
    SetUserId(Option<UserId>),
    SetMatches(Vec<MatchSummary>),
}

// Apply the command to the session data. Intended to be called within
// PersistenceManager's modify_session context.
pub fn apply_command_to_session(session: &mut SessionData, command: SessionCommand) {
    match command {
        SessionCommand::SetCredential(credential) => {
            session.credential = credential;
        }
        SessionCommand::SetUserId(user_id) => {
            session.user_id = user_id;
        }
        SessionCommand::SetMatches(matches) => {
            session.matches = matches;
        }
    }
}
