// src/constants.rs

/// Token separator used when no configuration overrides it.
pub const DEFAULT_TOKEN_SEPARATOR: char = ' ';

/// Characters that open and close a quoted token by default.
pub const DEFAULT_QUOTE_CHARS: &[char] = &['"', '\''];

/// Makes the next character literal inside or outside quotes.
pub const ESCAPE_CHAR: char = '\\';

/// Number of background workers started by the demo binary.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// The name of the directory holding parley configuration (inside the user config dir).
pub const CONFIG_DIR_NAME: &str = "parley";

/// The name of the engine configuration file.
pub const CONFIG_FILENAME: &str = "parley.toml";

/// Environment variable pointing at an explicit configuration file.
pub const CONFIG_ENV_VAR: &str = "PARLEY_CONFIG";
