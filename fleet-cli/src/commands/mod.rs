use async_trait::async_trait;
use clap::ArgMatches;
use color_eyre::eyre::Result;
use thiserror::Error;

pub mod run;

#[derive(Error, Debug)]
pub enum CommandErrors {
    #[error("Required user input `{0}` is missing.")]
    RequiredUserInputMissing(String),
    #[error("Argument `{0}` failed validation `{1}`")]
    InputValidationFailure(String, String),
    #[error("Invalid subcommand `{0}`.")]
    InvalidSubcommand(String),
}

pub struct CliContext<'a> {
    pub matches: &'a ArgMatches,
}

impl<'a> CliContext<'a> {
    pub fn new(matches: &'a ArgMatches) -> Self {
        Self { matches }
    }
}

#[async_trait]
pub trait Command<'a> {
    fn new() -> Self
    where
        Self: Sized;

    async fn run(&self, context: &'a CliContext) -> Result<()>;
}

pub trait ArgumentReader<'a> {
    /// Read argument from the CLI args with a validation function.
    fn read_argument_with_validator<V>(
        &self,
        arg_matches: &'a ArgMatches,
        id: &'a str,
        validator: &mut V,
    ) -> Result<String>
    where
        V: FnMut(&String) -> Result<(), CommandErrors>,
    {
        if let Some(arg) = arg_matches.get_one::<String>(id) {
            validator(arg)?;
            Ok(arg.clone())
        } else {
            Err(CommandErrors::RequiredUserInputMissing(id.into()))?
        }
    }

    /// Read an optional argument, validating it when present.
    fn read_optional_argument_with_validator<V>(
        &self,
        arg_matches: &'a ArgMatches,
        id: &'a str,
        validator: &mut V,
    ) -> Result<Option<String>>
    where
        V: FnMut(&String) -> Result<(), CommandErrors>,
    {
        match arg_matches.get_one::<String>(id) {
            Some(arg) => {
                validator(arg)?;
                Ok(Some(arg.clone()))
            }
            None => Ok(None),
        }
    }
}

/// Validator for arguments naming a file that must already exist.
pub fn existing_file(id: &str) -> impl FnMut(&String) -> Result<(), CommandErrors> + '_ {
    move |path: &String| {
        if std::path::Path::new(path).is_file() {
            Ok(())
        } else {
            Err(CommandErrors::InputValidationFailure(
                id.to_string(),
                "file exists".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::{Arg, Command as ClapCommand};

    use super::*;

    struct Reader;
    impl<'a> ArgumentReader<'a> for Reader {}

    fn matches(args: &[&str]) -> Result<ArgMatches> {
        Ok(ClapCommand::new("test")
            .arg(Arg::new("hosts").long("hosts"))
            .try_get_matches_from(args)?)
    }

    #[test]
    fn test_missing_required_argument() -> Result<()> {
        let matches = matches(&["test"])?;
        let err = Reader
            .read_argument_with_validator(&matches, "hosts", &mut |_| Ok(()))
            .unwrap_err();
        assert_eq!(
            "Required user input `hosts` is missing.",
            err.to_string()
        );
        assert_eq!(
            None,
            Reader
                .read_optional_argument_with_validator(&matches, "hosts", &mut |_| Ok(()))?
        );
        Ok(())
    }

    #[test]
    fn test_existing_file_validator_rejects_missing_paths() -> Result<()> {
        let matches = matches(&["test", "--hosts", "/definitely/not/here.yaml"])?;
        let err = Reader
            .read_argument_with_validator(&matches, "hosts", &mut existing_file("hosts"))
            .unwrap_err();
        assert_eq!(
            "Argument `hosts` failed validation `file exists`",
            err.to_string()
        );
        Ok(())
    }
}
