use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag_no_case},
    character::complete::{char, multispace0, multispace1},
    combinator::{map, opt, value},
    sequence::{delimited, preceded},
    IResult,
};

#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    Exchange { secret: String },
    Health,
    Help,
    Exit,
}

// --- BASIC PARSERS ---

/// Double-quoted string. `\"` and `\\` are the only escapes.
fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    let inner = escaped_transform(
        is_not("\\\""),
        '\\',
        alt((value("\\", char('\\')), value("\"", char('"')))),
    );
    map(delimited(char('"'), opt(inner), char('"')), |s| s.unwrap_or_default())(input)
}

fn tag_ci(t: &'static str) -> impl FnMut(&str) -> IResult<&str, &str> {
    move |input| tag_no_case(t)(input)
}

// --- COMMAND PARSERS ---

fn parse_exchange(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("EXCHANGE")(input)?;
    let (input, secret) = preceded(multispace1, parse_quoted_string)(input)?;
    Ok((input, Command::Exchange { secret }))
}

fn parse_health(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("HEALTH")(input)?;
    Ok((input, Command::Health))
}

fn parse_help(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("HELP")(input)?;
    Ok((input, Command::Help))
}

fn parse_exit(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("EXIT"), tag_ci("QUIT")))(input)?;
    Ok((input, Command::Exit))
}

pub fn parse_command(input: &str) -> Result<Command, String> {
    let input = input.trim();
    let result = delimited(
        multispace0,
        alt((parse_exchange, parse_health, parse_help, parse_exit)),
        multispace0,
    )(input);

    match result {
        Ok((remainder, cmd)) => {
            if !remainder.trim().is_empty() {
                return Err(format!("Unexpected tokens at end: '{}'", remainder));
            }
            Ok(cmd)
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let context: String = e.input.chars().take(20).collect();
            if context.is_empty() {
                Err("Incomplete command.".to_string())
            } else if e.input.chars().count() > 20 {
                Err(format!("Invalid syntax near: '{}...'", context))
            } else {
                Err(format!("Invalid syntax near: '{}'", context))
            }
        }
        Err(nom::Err::Incomplete(_)) => Err("Incomplete command.".to_string()),
    }
}
