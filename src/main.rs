use clap::{Arg, ArgAction, Command};
use colored::Colorize;

const APP_HEADER: &str = r"
   _____                          ____                __
  / ___/___  _______  __________ / __ \____ _____  ____/ /___  ____ ___
  \__ \/ _ \/ ___/ / / / ___/ _ \/ /_/ / __ `/ __ \/ __  / __ \/ __ `__ \
 ___/ /  __/ /__/ /_/ / /  /  __/ _, _/ /_/ / / / / /_/ / /_/ / / / / / /
/____/\___/\___/\__,_/_/   \___/_/ |_|\__,_/_/ /_/\__,_/\____/_/ /_/ /_/
";

fn main() {
    let matches = Command::new("securerandom-cli")
        .about("Draw bytes from the process-wide securerandom instance")
        .subcommand(
            Command::new("status").about("Report the process-wide instance's seeding quality"),
        )
        .subcommand(
            Command::new("random")
                .about("Print a random u32 or u64")
                .arg(
                    Arg::new("wide")
                        .long("wide")
                        .help("draw a u64 instead of a u32")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("uniform")
                .about("Print a random value in [0, N)")
                .arg(Arg::new("bound").required(true)),
        )
        .subcommand(
            Command::new("random-buf")
                .about("Print N random bytes as hex")
                .arg(Arg::new("length").required(true)),
        )
        .subcommand(
            Command::new("addrandom")
                .about("Mix a string into the pool as extra entropy")
                .arg(Arg::new("data").required(true)),
        )
        .subcommand(
            Command::new("reseed")
                .about("Force the next draw to reseed from fresh entropy"),
        )
        .get_matches();

    println!("{}", APP_HEADER.blue());

    let result = match matches.subcommand() {
        Some(("status", _)) => run_status(),
        Some(("random", sub)) => run_random(sub.get_flag("wide")),
        Some(("uniform", sub)) => run_uniform(sub.get_one::<String>("bound").unwrap()),
        Some(("random-buf", sub)) => run_random_buf(sub.get_one::<String>("length").unwrap()),
        Some(("addrandom", sub)) => run_addrandom(sub.get_one::<String>("data").unwrap()),
        Some(("reseed", _)) => run_reseed(),
        _ => run_status(),
    };

    if let Err(e) = result {
        eprintln!("{}: {e}", "ERROR".red());
        std::process::exit(1);
    }
}

fn run_status() -> securerandom::Result<()> {
    let quality = securerandom::status();
    let label = match quality {
        2 => "strong".green(),
        1 => "weak-only".yellow(),
        0 => "partial".yellow(),
        -1 => "underseeded".red(),
        _ => "init failed".red(),
    };
    println!("seeding status: {label} ({quality})");
    Ok(())
}

fn run_random(wide: bool) -> securerandom::Result<()> {
    if wide {
        println!("{}", securerandom::random64()?);
    } else {
        println!("{}", securerandom::random()?);
    }
    Ok(())
}

fn run_uniform(bound: &str) -> securerandom::Result<()> {
    let upper: u64 = bound
        .parse()
        .map_err(|_| securerandom::Error::ConfigError("bound must be a non-negative integer"))?;
    println!("{}", securerandom::random_uniform64(upper)?);
    Ok(())
}

fn run_random_buf(length: &str) -> securerandom::Result<()> {
    let len: usize = length
        .parse()
        .map_err(|_| securerandom::Error::ConfigError("length must be a non-negative integer"))?;
    let mut buf = vec![0u8; len];
    securerandom::random_buf(&mut buf)?;
    let hex: String = buf.iter().map(|b| format!("{b:02x}")).collect();
    println!("{hex}");
    Ok(())
}

fn run_addrandom(data: &str) -> securerandom::Result<()> {
    securerandom::addrandom(data.as_bytes())?;
    println!("mixed {} bytes into the pool", data.len());
    Ok(())
}

fn run_reseed() -> securerandom::Result<()> {
    securerandom::need_reseed();
    println!("next draw will reseed from fresh entropy");
    Ok(())
}
