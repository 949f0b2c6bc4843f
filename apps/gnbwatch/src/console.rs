//! Operator console prompts.

use std::io::{self, BufRead, Write};

use gnbwatch_identity::{CredentialPrompt, Credentials};
use gnbwatch_protocol::Device;

/// Line-oriented operator dialogue over any reader/writer pair.
pub struct Console<R, W> {
    input: R,
    output: W,
    /// Read passwords from the terminal without echo.
    hide_password: bool,
}

impl Console<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        Self {
            input: io::stdin().lock(),
            output: io::stdout(),
            hide_password: true,
        }
    }
}

impl<R: BufRead, W: Write> Console<R, W> {
    /// Console reading every answer, passwords included, from `input`.
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            hide_password: false,
        }
    }

    pub fn say(&mut self, line: impl AsRef<str>) -> io::Result<()> {
        writeln!(self.output, "{}", line.as_ref())?;
        self.output.flush()
    }

    fn ask(&mut self, prompt: &str) -> io::Result<String> {
        write!(self.output, "{prompt}")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "input closed"));
        }
        Ok(line.trim().to_string())
    }

    fn ask_secret(&mut self, prompt: &str) -> io::Result<String> {
        if !self.hide_password {
            return self.ask(prompt);
        }
        write!(self.output, "{prompt}")?;
        self.output.flush()?;
        Ok(rpassword::read_password()?.trim().to_string())
    }

    /// Prints the numbered device list.
    pub fn list_devices(&mut self, devices: &[Device]) -> io::Result<()> {
        self.say("You have the following machines available:")?;
        for (i, device) in devices.iter().enumerate() {
            self.say(device_line(i, device))?;
        }
        Ok(())
    }

    /// Asks for a device index until one in range is entered.
    pub fn select_device(&mut self, devices: &[Device]) -> io::Result<usize> {
        if devices.is_empty() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no machines available"));
        }
        self.say("Select which machine you want to subscribe data from:")?;
        loop {
            let raw = self.ask("")?;
            match select_index(devices.len(), &raw) {
                Some(i) => return Ok(i),
                None => self.say("The number inserted does not match a machine, try again:")?,
            }
        }
    }

    /// Asks whether to save telemetry to a file; `false` selects the live view.
    pub fn confirm_save(&mut self) -> io::Result<bool> {
        self.say("Would you like to save the data to a file? (Y/N):")?;
        loop {
            let raw = self.ask("")?;
            match parse_yes_no(&raw) {
                Some(answer) => return Ok(answer),
                None => self.say("Incorrect input type y/Y for Yes or n/N for no:")?,
            }
        }
    }
}

impl<R: BufRead, W: Write> CredentialPrompt for Console<R, W> {
    fn credentials(&mut self, _attempt: u32) -> io::Result<Credentials> {
        let mut username = String::new();
        while username.is_empty() {
            username = self.ask("Insert username: ")?;
        }
        let mut password = String::new();
        while password.is_empty() {
            password = self.ask_secret("Insert password: ")?;
        }
        Ok(Credentials::new(username, password))
    }

    fn rejected(&mut self, _attempt: u32) {
        let _ = self.say("Invalid credentials, try again.");
    }
}

/// `<i> with id <id> and type <type>`
pub fn device_line(index: usize, device: &Device) -> String {
    format!(
        "{index} with id {} and type {}",
        device.id, device.oaibox_type
    )
}

/// Parses an operator's device choice; `None` unless `0 <= n < len`.
pub fn select_index(len: usize, raw: &str) -> Option<usize> {
    let n: i64 = raw.trim().parse().ok()?;
    usize::try_from(n).ok().filter(|&i| i < len)
}

/// `y`/`n` in any case.
pub fn parse_yes_no(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "y" => Some(true),
        "n" => Some(false),
        _ => None,
    }
}
