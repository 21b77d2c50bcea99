// Application configuration, loaded from environment variables and CLI flags.

/// Application configuration. Built once at startup and passed into the
/// components that need it.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Database URL (SQLite connection string).
    pub database_url: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Secret used to sign session tokens. When absent no token can be
    /// issued or verified, so every authenticated request fails.
    pub jwt_secret: Option<String>,
    /// Credential for the external battle judge. When absent every
    /// verdict comes from the deterministic elo fallback.
    pub judge_api_key: Option<String>,
    /// Password for the bootstrap `admin` account, created at startup if
    /// absent. When unset no admin account is seeded.
    pub admin_password: Option<String>,
    /// Whether to default the log filter to debug level.
    pub debug: bool,
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `DATABASE_URL` - SQLite connection string (default: `sqlite:arena.db?mode=rwc`)
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `JWT_SECRET` - session token signing secret
    /// - `GEMINI_API_KEY` - external judge credential
    /// - `ADMIN_PASSWORD` - bootstrap admin account password
    /// - `LOG_DEBUG` - set to `1` or `true` to default logging to debug
    ///
    /// CLI flags:
    /// - `--port <PORT>` - Override the port
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:arena.db?mode=rwc".to_string());

        // Port: CLI flag --port takes precedence, then env var, then default
        let port = Self::parse_cli_value(&args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| std::env::var("PORT").ok().and_then(|v| v.parse().ok()))
            .unwrap_or(3000);

        let jwt_secret = non_empty(std::env::var("JWT_SECRET").ok());
        let judge_api_key = non_empty(std::env::var("GEMINI_API_KEY").ok());
        let admin_password = non_empty(std::env::var("ADMIN_PASSWORD").ok());

        let debug = std::env::var("LOG_DEBUG")
            .map(|v| parse_bool_flag(&v))
            .unwrap_or(false);

        Config {
            database_url,
            port,
            jwt_secret,
            judge_api_key,
            admin_password,
            debug,
        }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}

fn parse_bool_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Treat an empty env var the same as an absent one.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cli_value() {
        let args: Vec<String> = ["arena-backend", "--port", "8080"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            Config::parse_cli_value(&args, "--port"),
            Some("8080".to_string())
        );
        assert_eq!(Config::parse_cli_value(&args, "--missing"), None);
    }

    #[test]
    fn test_parse_bool_flag() {
        assert!(parse_bool_flag("1"));
        assert!(parse_bool_flag("true"));
        assert!(parse_bool_flag("TRUE"));
        assert!(!parse_bool_flag("0"));
        assert!(!parse_bool_flag(""));
        assert!(!parse_bool_flag("no"));
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some("x".to_string())), Some("x".to_string()));
        assert_eq!(non_empty(Some("  ".to_string())), None);
        assert_eq!(non_empty(None), None);
    }
}
