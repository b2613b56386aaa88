pub mod resolve_exception_command;
