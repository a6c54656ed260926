use piezo::PerAxis;
use tokio::sync::oneshot;

use crate::models::{AxisRequest, Command, CommandEnvelope, CommandError, CommandResult};

/// Placeholder for an axis that should not be touched.
const ABSENT_AXIS: &str = "_";

fn invalid_format() -> CommandError {
    "Invalid command format".into()
}

fn parse_axis_value(token: &str) -> Result<Option<f64>, CommandError> {
    let token = token.trim();
    if token == ABSENT_AXIS {
        return Ok(None);
    }

    token
        .parse::<f64>()
        .map(Some)
        .map_err(|_| format!("value '{}' is not a valid number", token).into())
}

fn parse_axes(values: &[&str]) -> Result<AxisRequest, CommandError> {
    let [x, y, z] = values else {
        return Err(invalid_format());
    };

    Ok(PerAxis::new(
        parse_axis_value(x)?,
        parse_axis_value(y)?,
        parse_axis_value(z)?,
    ))
}

pub fn parse_command(
    cmd_str: &str,
) -> Result<(CommandEnvelope, oneshot::Receiver<CommandResult>), CommandError> {
    let parts: Vec<&str> = cmd_str.trim().split(':').collect();
    if parts.len() < 2 {
        return Err(invalid_format());
    }

    let command = match parts[0] {
        "move" => Command::Move(parse_axes(&parts[1..])?),
        "step" => Command::Step(parse_axes(&parts[1..])?),
        "check" => Command::Check(parse_axes(&parts[1..])?),
        "get" => {
            if parts.len() != 2 {
                return Err(invalid_format());
            }
            match parts[1] {
                "position" => Command::GetPosition,
                "voltage" => Command::GetVoltage,
                _ => return Err(invalid_format()),
            }
        }
        _ => return Err(invalid_format()),
    };

    let (tx, rx) = oneshot::channel();
    Ok((
        CommandEnvelope {
            command,
            response: tx,
        },
        rx,
    ))
}

#[cfg(test)]
mod tests {
    use piezo::Axis;

    use super::*;

    fn parse(cmd: &str) -> Result<Command, CommandError> {
        parse_command(cmd).map(|(envelope, _)| envelope.command)
    }

    #[test]
    fn parses_move_with_absent_axes() {
        assert_eq!(
            parse("move:10.5:_:3\n").unwrap(),
            Command::Move(PerAxis::new(Some(10.5), None, Some(3.0)))
        );
        assert_eq!(
            parse("step:_:-0.25:_").unwrap(),
            Command::Step(PerAxis::only(Axis::Y, -0.25))
        );
        assert_eq!(
            parse("check:1:2:3").unwrap(),
            Command::Check(PerAxis::new(Some(1.0), Some(2.0), Some(3.0)))
        );
    }

    #[test]
    fn parses_queries() {
        assert_eq!(parse("get:position").unwrap(), Command::GetPosition);
        assert_eq!(parse("get:voltage\r\n").unwrap(), Command::GetVoltage);
    }

    #[test]
    fn non_numeric_value_is_reported() {
        let err = parse("move:1:abc:3").unwrap_err();
        assert_eq!(err.message, "value 'abc' is not a valid number");
    }

    #[test]
    fn malformed_commands_are_rejected() {
        for cmd in [
            "",
            "move",
            "move:1:2",
            "move:1:2:3:4",
            "get:state",
            "get:position:x",
            "stop:1",
        ] {
            let err = parse(cmd).unwrap_err();
            assert_eq!(err.message, "Invalid command format", "command {cmd:?}");
        }
    }
}
