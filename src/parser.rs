use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while1},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{map_res, opt, recognize},
    sequence::{delimited, preceded, tuple},
    IResult,
};

/// Results requested by `NEAREST` without a `LIMIT`.
pub const DEFAULT_LIMIT: usize = 10;

#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    Record { identity: String, latitude: f64, longitude: f64 },
    Nearest { identity: String, limit: usize },
    When { identity: String },
    Count,
    Help,
    Exit,
}

// --- BASIC PARSERS ---

fn parse_float(input: &str) -> IResult<&str, f64> {
    let (input, num_str) = recognize(tuple((
        opt(alt((char('-'), char('+')))),
        digit1,
        opt(tuple((char('.'), digit1))),
    )))(input)?;
    match num_str.parse::<f64>() {
        Ok(n) => Ok((input, n)),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Float))),
    }
}

fn parse_usize(input: &str) -> IResult<&str, usize> {
    map_res(digit1, |s: &str| s.parse::<usize>())(input)
}

/// Bare token or single-quoted; either way no separators the log can't hold.
fn parse_identity(input: &str) -> IResult<&str, String> {
    let bare = take_while1(|c: char| !c.is_whitespace() && c != ',' && c != '\'');
    let (input, id) = alt((
        delimited(char('\''), take_while1(|c: char| c != '\'' && c != ',' && c != '\n'), char('\'')),
        bare,
    ))(input)?;
    Ok((input, id.to_string()))
}

// --- HELPERS ---
fn tag_ci(t: &'static str) -> impl FnMut(&str) -> IResult<&str, &str> {
    move |input| tag_no_case(t)(input)
}

/// Coordinates may be written `51.5 -0.12` or `51.5, -0.12`.
fn coord_sep(input: &str) -> IResult<&str, &str> {
    alt((recognize(tuple((multispace0, char(','), multispace0))), multispace1))(input)
}

// --- COMMAND PARSERS ---

fn parse_record(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("RECORD")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, identity) = parse_identity(input)?;
    let (input, _) = multispace1(input)?;
    let (input, latitude) = parse_float(input)?;
    let (input, _) = coord_sep(input)?;
    let (input, longitude) = parse_float(input)?;
    Ok((input, Command::Record { identity, latitude, longitude }))
}

fn parse_nearest(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("NEAREST"), tag_ci("NEAR")))(input)?;
    let (input, _) = multispace1(input)?;
    let (input, identity) = parse_identity(input)?;
    let (input, limit) = opt(preceded(
        tuple((multispace1, tag_ci("LIMIT"), multispace1)),
        parse_usize,
    ))(input)?;
    Ok((input, Command::Nearest { identity, limit: limit.unwrap_or(DEFAULT_LIMIT) }))
}

fn parse_when(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("WHEN"), tag_ci("FIRST_SEEN")))(input)?;
    let (input, _) = multispace1(input)?;
    let (input, identity) = parse_identity(input)?;
    Ok((input, Command::When { identity }))
}

fn parse_count(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("COUNT")(input)?;
    Ok((input, Command::Count))
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
    let result = alt((
        parse_record,
        parse_nearest,
        parse_when,
        parse_count,
        parse_help,
        parse_exit,
    ))(input);

    match result {
        Ok((remainder, cmd)) => {
            if !remainder.trim().is_empty() {
                return Err(format!("Unexpected tokens at end: '{}'", remainder));
            }
            Ok(cmd)
        },
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            // e.input contains the slice where parsing failed
            let context: String = if e.input.chars().count() > 20 {
                format!("{}...", e.input.chars().take(20).collect::<String>())
            } else {
                e.input.to_string()
            };
            Err(format!("Invalid syntax near: '{}'", context))
        },
        Err(nom::Err::Incomplete(_)) => Err("Incomplete command.".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_forms() {
        let expected = Command::Record { identity: "alice".into(), latitude: 51.5, longitude: -0.12 };
        assert_eq!(parse_command("RECORD alice 51.5 -0.12").unwrap(), expected);
        assert_eq!(parse_command("record alice 51.5, -0.12").unwrap(), expected);
        assert_eq!(parse_command("  Record 'alice' 51.5,-0.12  ").unwrap(), expected);
    }

    #[test]
    fn nearest_with_and_without_limit() {
        assert_eq!(
            parse_command("NEAREST 1234 LIMIT 3").unwrap(),
            Command::Nearest { identity: "1234".into(), limit: 3 }
        );
        assert_eq!(
            parse_command("near 1234").unwrap(),
            Command::Nearest { identity: "1234".into(), limit: DEFAULT_LIMIT }
        );
    }

    #[test]
    fn simple_commands() {
        assert_eq!(parse_command("WHEN bob").unwrap(), Command::When { identity: "bob".into() });
        assert_eq!(parse_command("count").unwrap(), Command::Count);
        assert_eq!(parse_command("HELP").unwrap(), Command::Help);
        assert_eq!(parse_command("quit").unwrap(), Command::Exit);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_command("RECORD alice north south").is_err());
        assert!(parse_command("RECORD alice 1").is_err());
        assert!(parse_command("NEAREST").is_err());
        assert!(parse_command("COUNT everything").is_err());
        assert!(parse_command("DROP TABLE").is_err());
    }
}
