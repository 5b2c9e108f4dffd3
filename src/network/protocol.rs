//! Построчный текстовый протокол эталонного TCP-транспорта.
//!
//! ```text
//! C: HELLO device 42
//! S: +OK
//! C: PUBLISH user.alice {"kind":"update"}
//! S: +OK
//! C: PING
//! S: +PONG
//! C: QUIT
//! ```
//!
//! Сообщения, маршрутизированные соединению, пишутся как `<payload>\n`.

use sensorlink_error::{bail, ensure, HandshakeError, RelayResult, StatusCode};

use crate::routing::{ConnectionClass, ConnectionKey};

/// Команда клиента после рукопожатия.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Publish { topic: String, payload: String },
    Quit,
}

/// Ответ сервера на строку клиента.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Pong,
    Error(String),
}

/// Разбирает строку приветствия `HELLO <user|device> <identifier>`.
pub fn parse_hello(line: &str) -> Result<ConnectionKey, HandshakeError> {
    let line = trim_line(line);
    let mut parts = line.split_whitespace();

    let (Some(verb), Some(class), Some(identifier), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(HandshakeError::Malformed {
            line: line.to_string(),
        });
    };

    if !verb.eq_ignore_ascii_case("HELLO") {
        return Err(HandshakeError::Malformed {
            line: line.to_string(),
        });
    }

    let class: ConnectionClass = class.parse()?;
    Ok(ConnectionKey::new(class, identifier)?)
}

impl Command {
    /// Разбирает командную строку.
    ///
    /// Полезная нагрузка `PUBLISH` занимает остаток строки и может содержать
    /// пробелы.
    pub fn parse(line: &str) -> RelayResult<Self> {
        let line = trim_line(line);
        ensure!(!line.is_empty(), StatusCode::InvalidCommand, "empty command");

        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));

        if verb.eq_ignore_ascii_case("PING") {
            Ok(Self::Ping)
        } else if verb.eq_ignore_ascii_case("QUIT") {
            Ok(Self::Quit)
        } else if verb.eq_ignore_ascii_case("PUBLISH") {
            let Some((topic, payload)) = rest.trim_start().split_once(' ') else {
                bail!(
                    StatusCode::InvalidCommand,
                    "PUBLISH requires a topic and a payload"
                );
            };
            let key = ConnectionKey::from_topic(topic)?;
            Ok(Self::Publish {
                topic: key.topic(),
                payload: payload.to_string(),
            })
        } else {
            bail!(StatusCode::InvalidCommand, "unknown command '{}'", verb)
        }
    }
}

impl Reply {
    /// Кодирует ответ в строку протокола.
    pub fn encode(&self) -> String {
        match self {
            Self::Ok => "+OK\n".to_string(),
            Self::Pong => "+PONG\n".to_string(),
            Self::Error(msg) => format!("-ERR {}\n", single_line(msg)),
        }
    }
}

fn trim_line(line: &str) -> &str {
    line.trim_end_matches(['\r', '\n'])
}

fn single_line(msg: &str) -> String {
    msg.replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hello() {
        let key = parse_hello("HELLO device 42\r\n").unwrap();
        assert_eq!(key.topic(), "device.42");

        let key = parse_hello("hello USER alice").unwrap();
        assert_eq!(key.topic(), "user.alice");
    }

    /// Тест проверяет, что неидентифицируемое соединение отвергается.
    #[test]
    fn test_parse_hello_rejects_bad_identity() {
        assert!(matches!(
            parse_hello("HELLO robot 1"),
            Err(HandshakeError::Identity(_))
        ));
        assert!(matches!(
            parse_hello("HELLO user"),
            Err(HandshakeError::Malformed { .. })
        ));
        assert!(matches!(
            parse_hello("HI user alice"),
            Err(HandshakeError::Malformed { .. })
        ));
        assert!(matches!(
            parse_hello("HELLO user alice extra"),
            Err(HandshakeError::Malformed { .. })
        ));
    }

    /// Тест проверяет, что полезная нагрузка PUBLISH сохраняет пробелы.
    #[test]
    fn test_parse_publish_keeps_payload() {
        let cmd = Command::parse("PUBLISH user.alice {\"kind\": \"update\"}\n").unwrap();
        assert_eq!(
            cmd,
            Command::Publish {
                topic: "user.alice".to_string(),
                payload: "{\"kind\": \"update\"}".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_errors_have_status() {
        let err = Command::parse("FLY away").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidCommand);

        let err = Command::parse("PUBLISH foo.bar x").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidTopic);

        let err = Command::parse("PUBLISH user.alice").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidCommand);

        assert!(Command::parse("").is_err());
        assert_eq!(Command::parse("ping").unwrap(), Command::Ping);
    }

    #[test]
    fn test_reply_encoding() {
        assert_eq!(Reply::Ok.encode(), "+OK\n");
        assert_eq!(Reply::Pong.encode(), "+PONG\n");
        assert_eq!(Reply::Error("bad\nline".into()).encode(), "-ERR bad line\n");
    }
}
