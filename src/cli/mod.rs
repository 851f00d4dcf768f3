mod commands;

pub use commands::{
    ApplicantCommand, ApplicationCommand, Cli, Commands, OutputFormat, SchemeCommand,
};
