use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

pub struct Config {
    pub server: ServerConfig,
    pub quiz: QuizConfig,
}

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

pub struct QuizConfig {
    /// Directory scanned for quiz definition JSON files at startup
    pub questions_dir: String,
    /// Shared password checked by the teacher verification endpoint
    pub teacher_password: String,
    /// How long a room survives without a connected host
    pub host_grace_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .expect("Invalid SERVER_PORT"),
            },
            quiz: QuizConfig {
                questions_dir: env::var("QUESTIONS_DIR")
                    .unwrap_or_else(|_| "./questions".to_string()),
                teacher_password: env::var("TEACHER_PASSWORD")
                    .unwrap_or_else(|_| "quizmaster123".to_string()),
                host_grace_secs: env::var("HOST_GRACE_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .unwrap_or(60),
            },
        }
    }

    pub fn bind_address(&self) -> ([u8; 4], u16) {
        let ip_addr = self.parse_host_to_ipv4();
        (ip_addr.octets(), self.server.port)
    }

    fn parse_host_to_ipv4(&self) -> Ipv4Addr {
        if let Ok(addr) = self.server.host.parse::<IpAddr>() {
            match addr {
                IpAddr::V4(ipv4) => return ipv4,
                IpAddr::V6(_) => {
                    tracing::warn!(
                        host = %self.server.host,
                        "IPv6 address provided but only IPv4 supported, using 0.0.0.0"
                    );
                    return Ipv4Addr::new(0, 0, 0, 0);
                }
            }
        }

        match self.server.host.as_str() {
            "localhost" => Ipv4Addr::new(127, 0, 0, 1),
            "" | "0.0.0.0" => Ipv4Addr::new(0, 0, 0, 0),
            _ => {
                tracing::warn!(
                    host = %self.server.host,
                    "Unable to parse host as IPv4, using 0.0.0.0"
                );
                Ipv4Addr::new(0, 0, 0, 0)
            }
        }
    }
}

impl QuizConfig {
    pub fn host_grace(&self) -> Duration {
        Duration::from_secs(self.host_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_quiz_config() -> QuizConfig {
        QuizConfig {
            questions_dir: "./questions".to_string(),
            teacher_password: "quizmaster123".to_string(),
            host_grace_secs: 60,
        }
    }

    #[test]
    fn test_parse_localhost() {
        let config = Config {
            server: ServerConfig {
                host: "localhost".to_string(),
                port: 3000,
            },
            quiz: default_quiz_config(),
        };

        let addr = config.bind_address();
        assert_eq!(addr, ([127, 0, 0, 1], 3000));
    }

    #[test]
    fn test_parse_ipv4_address() {
        let config = Config {
            server: ServerConfig {
                host: "192.168.1.1".to_string(),
                port: 3000,
            },
            quiz: default_quiz_config(),
        };

        let addr = config.bind_address();
        assert_eq!(addr, ([192, 168, 1, 1], 3000));
    }

    #[test]
    fn test_parse_invalid_hostname_defaults_to_all() {
        let config = Config {
            server: ServerConfig {
                host: "invalid-hostname".to_string(),
                port: 9000,
            },
            quiz: default_quiz_config(),
        };

        let addr = config.bind_address();
        assert_eq!(addr, ([0, 0, 0, 0], 9000));
    }

    #[test]
    fn test_host_grace_duration() {
        let quiz = default_quiz_config();
        assert_eq!(quiz.host_grace(), Duration::from_secs(60));
    }
}
