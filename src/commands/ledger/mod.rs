pub mod append_delta_command;
