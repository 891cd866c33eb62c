use serde::{Deserialize, Serialize};
use std::fmt;

/// Subdirectory of a node's working directory where retrieved files land.
pub const DOWNLOAD_DIR: &str = "download";

/// Commands understood by the node executable on its standard input.
///
/// Each command is a token line; commands carrying a value are followed by
/// a second line once the node has consumed the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlCommand {
    // Leave the ring and exit
    Quit,
    // Dump ring membership to the node's own output
    PrintState,
    // Store a file, path relative to the node's working directory
    StoreFile(String),
    // Fetch a file into download/<name>
    GetFile(String),
    // Print the successor responsible for a key
    Lookup(String),
    // Store every file below a directory
    StoreFiles(String),
    // Clear the node's terminal
    Clear,
}

impl ControlCommand {
    pub fn token(&self) -> &'static str {
        match self {
            ControlCommand::Quit => "QUIT",
            ControlCommand::PrintState => "PRINTSTATE",
            ControlCommand::StoreFile(_) => "STOREFILE",
            ControlCommand::GetFile(_) => "GETFILE",
            ControlCommand::Lookup(_) => "LOOKUP",
            ControlCommand::StoreFiles(_) => "STOREFILES",
            ControlCommand::Clear => "CLEAR",
        }
    }

    pub fn argument(&self) -> Option<&str> {
        match self {
            ControlCommand::StoreFile(arg)
            | ControlCommand::GetFile(arg)
            | ControlCommand::Lookup(arg)
            | ControlCommand::StoreFiles(arg) => Some(arg),
            ControlCommand::Quit | ControlCommand::PrintState | ControlCommand::Clear => None,
        }
    }

    /// Prompt the node prints after reading the token and before reading
    /// the argument line.
    pub fn argument_prompt(&self) -> Option<&'static str> {
        match self {
            ControlCommand::StoreFile(_) => Some("Enter the file location:"),
            ControlCommand::GetFile(_) => Some("Enter the file name:"),
            ControlCommand::Lookup(_) => Some("Enter key to lookup:"),
            ControlCommand::StoreFiles(_) => Some("Enter the directory location:"),
            ControlCommand::Quit | ControlCommand::PrintState | ControlCommand::Clear => None,
        }
    }

    /// Line the node echoes once it starts executing the command.
    pub fn echo_marker(&self) -> String {
        format!("Command: {}", self.token())
    }

    /// Text the node prints when a file command finishes, whether it
    /// succeeded or not.
    pub fn completion_marker(&self) -> Option<String> {
        match self {
            ControlCommand::StoreFile(path) => Some(format!("Storing file {}", path)),
            ControlCommand::GetFile(name) => Some(format!("Getting file {}", name)),
            _ => None,
        }
    }

    /// Token line as written to the channel.
    pub fn token_line(&self) -> String {
        format!("{}\n", self.token())
    }

    pub fn argument_line(&self) -> Option<String> {
        self.argument().map(|arg| format!("{}\n", arg))
    }

    /// Every byte the command puts on the channel, in order.
    pub fn encode(&self) -> String {
        let mut wire = self.token_line();
        if let Some(arg) = self.argument_line() {
            wire.push_str(&arg);
        }
        wire
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.argument() {
            Some(arg) => write!(f, "{} {}", self.token(), arg),
            None => f.write_str(self.token()),
        }
    }
}
