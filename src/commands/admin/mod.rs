pub mod rebuild_windows_command;
