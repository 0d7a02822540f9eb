use clap::{Parser, Subcommand};
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use vnbacktest::commands::backtest::{self, BacktestArgs};
use vnbacktest::errors::RunFailure;

#[derive(Parser)]
#[command(name = "vnbacktest")]
#[command(about = "Weekly swing-strategy backtester for VN equities")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate the weekly strategy over a historical window
    Backtest {
        /// Backtest start date (inclusive)
        #[arg(long = "from", value_name = "YYYY-MM-DD")]
        from: String,
        /// Backtest end date (inclusive)
        #[arg(long = "to", value_name = "YYYY-MM-DD")]
        to: String,
        /// Starting cash in VND
        #[arg(long, default_value_t = 10_000_000)]
        initial_cash: i64,
        /// Fixed VND per trade; omit to use risk-based sizing
        #[arg(long)]
        order_size: Option<i64>,
        /// Max new positions to open each week
        #[arg(long, default_value_t = 4)]
        trades_per_week: usize,
        /// Watchlist file (newline-separated symbols, '#' comments); omit
        /// for the builtin watchlist
        #[arg(long, value_name = "PATH")]
        universe: Option<PathBuf>,
        /// generate: compute recommendations per week; plan: reuse a static plan
        #[arg(long, default_value = "generate")]
        mode: String,
        /// Weekly plan JSON used with --mode plan
        #[arg(long, value_name = "PATH", default_value = "data/weekly_plan.json")]
        plan_file: PathBuf,
        /// Same-bar SL+TP tie-breaker: worst=SL first, best=TP first
        #[arg(long, default_value = "worst")]
        tie_breaker: String,
        /// tpsl_only, 3action or 4action
        #[arg(long, default_value = "tpsl_only")]
        exit_mode: String,
        /// Run both tie-breakers and emit a comparison
        #[arg(long)]
        run_range: bool,
        /// Base directory for timestamped report folders
        #[arg(long, value_name = "DIR", default_value = "reports")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let result = match cli.command {
        Commands::Backtest {
            from,
            to,
            initial_cash,
            order_size,
            trades_per_week,
            universe,
            mode,
            plan_file,
            tie_breaker,
            exit_mode,
            run_range,
            output,
        } => {
            backtest::run(&BacktestArgs {
                from,
                to,
                initial_cash,
                order_size,
                trades_per_week,
                universe,
                mode,
                plan_file,
                tie_breaker,
                exit_mode,
                run_range,
                output,
            })
            .await
        }
    };

    match result {
        Ok(output_dir) => {
            info!("Backtest complete. Results written to {}", output_dir.display());
            println!("{}", output_dir.display());
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{:#}", err);
            let code = err
                .downcast_ref::<RunFailure>()
                .map(|failure| failure.exit_code())
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}
