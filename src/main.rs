//! Docent - on-device artwork recognition and art docent chat

use clap::Parser;

use docent::cli::{Cli, Command};
use docent::commands::{self, ask, recognize, Globals};
use docent::ui::{self, Log};

fn main() {
	let cli = Cli::parse();
	Log::set_verbose(cli.verbose);

	if cli.verbose {
		ui::log::print_logo();
	}

	let globals = Globals { provider: cli.provider, config: cli.config, models: cli.models };

	let result = match cli.command {
		Command::Recognize { image, top, threshold, metric, crop, save_preview } => recognize::run(
			&globals,
			recognize::Options { image, top, threshold, metric, crop, save_preview },
		),
		Command::Ask { question, image, artwork, timeout, max_tokens, seed } => ask::run(
			&globals,
			ask::Options { question, image, artwork, timeout, max_tokens, seed },
		)
		.map(|_| true),
		Command::Catalog { export } => commands::catalog::run(&globals, export),
	};

	match result {
		Ok(true) => {}
		Ok(false) => std::process::exit(1),
		Err(e) => {
			ui::error(&format!("{:#}", e));
			let code = e
				.downcast_ref::<docent::Error>()
				.map(|err| err.kind().exit_code())
				.unwrap_or(1);
			std::process::exit(code);
		}
	}
}
