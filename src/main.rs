mod cli;
mod commands;
mod env_loader;
mod error;
mod imgfix;
mod logging;

fn main() {
    env_loader::load_dotenv();

    if let Err(err) = cli::run() {
        if let Some(typed) = err.downcast_ref::<error::FixerError>() {
            eprintln!("error[{}]: {err:#}", typed.code().as_str());
        } else {
            eprintln!("error: {err:#}");
        }
        std::process::exit(1);
    }
}
