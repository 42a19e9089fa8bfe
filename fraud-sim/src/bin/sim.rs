//! Fraud game simulation CLI.
//!
//! Run seeded simulations, attack scenarios and closed-form equilibrium
//! analysis from the command line.

#[cfg(feature = "cli")]
mod cli {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use anyhow::{Context, Result};
    use clap::{Args, Parser, Subcommand};
    use hfg_fraud_sim::{
        analysis::{linspace, stake_thresholds},
        attack_by_name, attack_profitability, compute_theoretical_equilibrium,
        experiments::{run_parameter_sweep, run_seeds_with, seed_range, CONVERGENCE_TOLERANCE},
        parameter_sensitivity, run_all_attacks, run_convergence, AttackResult, BatchSummary,
        ProfitabilityModel, ProtocolField, SimulationConfig, SimulationEngine, SimulationResult,
        ATTACKS, PRESETS,
    };
    use indicatif::{ProgressBar, ProgressStyle};
    use serde::Serialize;
    use tracing::info;

    #[derive(Parser)]
    #[command(name = "fraud-sim")]
    #[command(about = "Simulate the off-chain computation fraud game")]
    pub struct Cli {
        /// Debug-level logging
        #[arg(short, long, global = true)]
        pub verbose: bool,

        #[command(subcommand)]
        pub command: Command,
    }

    /// Where the base configuration comes from.
    #[derive(Args)]
    pub struct ConfigArgs {
        /// TOML configuration file
        #[arg(short, long, conflicts_with = "preset")]
        config: Option<PathBuf>,

        /// Named preset (see `presets`)
        #[arg(short, long, default_value = "baseline")]
        preset: String,

        /// Override the seed
        #[arg(short, long)]
        seed: Option<u64>,

        /// Override the number of periods
        #[arg(short = 'n', long)]
        periods: Option<u64>,
    }

    impl ConfigArgs {
        fn load(&self) -> Result<SimulationConfig> {
            let mut config = match &self.config {
                Some(path) => SimulationConfig::from_toml_file(path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => SimulationConfig::preset(&self.preset)?,
            };
            if let Some(seed) = self.seed {
                config = config.with_seed(seed);
            }
            if let Some(periods) = self.periods {
                config = config.with_periods(periods);
            }
            Ok(config)
        }
    }

    #[derive(Subcommand)]
    pub enum Command {
        /// Run the simulation for one or more seeds
        Run {
            #[command(flatten)]
            config: ConfigArgs,

            /// Number of consecutive seeds to run
            #[arg(short, long, default_value = "1")]
            runs: usize,

            /// Write the result as JSON
            #[arg(short, long)]
            output: Option<PathBuf>,
        },

        /// Compare an attack scenario against its baseline
        Attack {
            /// Attack name, or `all`
            name: String,

            #[command(flatten)]
            config: ConfigArgs,

            /// Write the comparison as JSON
            #[arg(short, long)]
            output: Option<PathBuf>,
        },

        /// Closed-form equilibrium at one point
        Equilibrium {
            #[command(flatten)]
            config: ConfigArgs,

            /// Job payment (defaults to the protocol's base payment)
            #[arg(long)]
            payment: Option<f64>,

            /// Posted stake
            #[arg(long, default_value = "100")]
            stake: f64,

            /// Client loss from undetected fraud (defaults to the base loss)
            #[arg(long)]
            loss: Option<f64>,
        },

        /// Sweep one protocol parameter
        Sensitivity {
            /// Parameter name, e.g. `challenge_bond`
            parameter: String,

            #[arg(long)]
            from: f64,

            #[arg(long)]
            to: f64,

            #[arg(long, default_value = "10")]
            steps: usize,

            #[command(flatten)]
            config: ConfigArgs,

            #[arg(long)]
            payment: Option<f64>,

            #[arg(long, default_value = "100")]
            stake: f64,

            #[arg(long)]
            loss: Option<f64>,

            /// Also simulate this many seeds at each value
            #[arg(long)]
            simulate: Option<usize>,
        },

        /// Minimum viable stake across payment levels
        Thresholds {
            #[arg(long, default_value = "1")]
            from: f64,

            #[arg(long, default_value = "100")]
            to: f64,

            #[arg(long, default_value = "10")]
            steps: usize,

            #[command(flatten)]
            config: ConfigArgs,
        },

        /// Closed-form profitability of the modelled attacks
        Profitability {
            #[command(flatten)]
            config: ConfigArgs,

            #[arg(long)]
            payment: Option<f64>,

            #[arg(long, default_value = "100")]
            stake: f64,

            #[arg(long)]
            loss: Option<f64>,
        },

        /// Measure how far rational providers land from the equilibrium fraud rate
        Convergence {
            #[command(flatten)]
            config: ConfigArgs,

            #[arg(short, long, default_value = "10")]
            runs: usize,

            #[arg(short, long, default_value_t = CONVERGENCE_TOLERANCE)]
            tolerance: f64,

            #[arg(short, long)]
            output: Option<PathBuf>,
        },

        /// List the built-in presets and attacks
        Presets,
    }

    pub fn run(cli: Cli) -> Result<()> {
        match cli.command {
            Command::Run { config, runs, output } => run_simulations(&config.load()?, runs, output),
            Command::Attack { name, config, output } => run_attack(&name, &config.load()?, output),
            Command::Equilibrium {
                config,
                payment,
                stake,
                loss,
            } => run_equilibrium(&config.load()?, payment, stake, loss),
            Command::Sensitivity {
                parameter,
                from,
                to,
                steps,
                config,
                payment,
                stake,
                loss,
                simulate,
            } => run_sensitivity(
                &config.load()?,
                &parameter,
                &linspace(from, to, steps),
                payment,
                stake,
                loss,
                simulate,
            ),
            Command::Thresholds {
                from,
                to,
                steps,
                config,
            } => run_thresholds(&config.load()?, &linspace(from, to, steps)),
            Command::Profitability {
                config,
                payment,
                stake,
                loss,
            } => run_profitability(&config.load()?, payment, stake, loss),
            Command::Convergence {
                config,
                runs,
                tolerance,
                output,
            } => run_convergence_study(&config.load()?, runs, tolerance, output),
            Command::Presets => {
                println!("Presets: {}", PRESETS.join(", "));
                println!("Attacks: {}", ATTACKS.join(", "));
                Ok(())
            }
        }
    }

    fn progress(len: u64, unit: &str) -> Result<ProgressBar> {
        let bar = ProgressBar::new(len);
        bar.set_style(
            ProgressStyle::with_template(&format!(
                "{{spinner}} [{{elapsed_precise}}] {{bar:40}} {{pos}}/{{len}} {}",
                unit
            ))?,
        );
        Ok(bar)
    }

    fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        info!("Wrote {}", path.display());
        Ok(())
    }

    fn run_simulations(config: &SimulationConfig, runs: usize, output: Option<PathBuf>) -> Result<()> {
        config.validate()?;
        println!("Fraud Game Simulation");
        println!("=====================");
        println!(
            "Providers: {}  Clients: {}  Challengers: {}",
            config.n_providers, config.n_clients, config.n_challengers
        );
        println!("Periods: {}  Jobs/period: {}", config.n_periods, config.jobs_per_period);
        println!("Seeds: {}..{}\n", config.seed, config.seed.saturating_add(runs as u64));

        if runs <= 1 {
            let bar = progress(config.n_periods, "periods")?;
            let result = SimulationEngine::new(config.clone())?.run_with_observer(|_| bar.inc(1));
            bar.finish_and_clear();
            print_result(&result);
            if let Some(path) = output {
                write_json(&path, &result)?;
            }
            return Ok(());
        }

        let bar = progress(runs as u64, "runs")?;
        let results = run_seeds_with(config, &seed_range(config.seed, runs), |_| bar.inc(1))?;
        bar.finish_and_clear();
        let summary = BatchSummary::from_results(&results);
        print_summary(&summary);
        if let Some(path) = output {
            write_json(&path, &summary)?;
        }
        Ok(())
    }

    fn print_result(result: &SimulationResult) {
        let totals = &result.totals;
        println!("===== RESULTS (seed {}) =====\n", result.seed);
        println!(
            "Jobs: {} generated, {} executed, {} unmatched, {} unexecuted",
            totals.jobs_generated, totals.jobs_executed, totals.jobs_unmatched, totals.jobs_unexecuted
        );
        println!(
            "Fraud rate: {:.4} (theory q* = {:.4}, deviation {:+.4})",
            result.fraud_rate,
            result.theoretical.q_star,
            result.deviation_from_theory()
        );
        println!("Detection rate: {:.4}", result.detection_rate);
        println!(
            "Disputes: {} ({:.1}% upheld)",
            totals.disputes,
            result.dispute_success_rate * 100.0
        );
        println!("Stake slashed: {:.2}", totals.stake_slashed);
        println!("Client fraud losses: {:.2}", totals.client_losses);
        println!(
            "Welfare: {:.2} (providers {:.2}, clients {:.2}, challengers {:.2})",
            result.welfare.total_welfare,
            result.welfare.provider_welfare,
            result.welfare.client_welfare,
            result.welfare.challenger_welfare
        );
        println!("Provider profit Gini: {:.4}", result.welfare.gini_coefficient);
        println!(
            "Reputation: mean {:.2}, min {:.2}, max {:.2}",
            result.reputation.mean_reputation,
            result.reputation.min_reputation,
            result.reputation.max_reputation
        );
        if !result.attack.farming_suspects.is_empty() || !result.attack.self_buy_suspects.is_empty() {
            println!(
                "Suspects: {} farming, {} self-buying",
                result.attack.farming_suspects.len(),
                result.attack.self_buy_suspects.len()
            );
        }
    }

    fn print_summary(summary: &BatchSummary) {
        println!("===== BATCH ({} runs) =====\n", summary.runs);
        println!(
            "Fraud rate: {:.4} ± {:.4} [{:.4}, {:.4}]",
            summary.fraud_rate.mean,
            summary.fraud_rate.std,
            summary.fraud_rate.min,
            summary.fraud_rate.max
        );
        println!(
            "Detection rate: {:.4} ± {:.4}",
            summary.detection_rate.mean, summary.detection_rate.std
        );
        println!("Stake slashed: {:.2} ± {:.2}", summary.stake_slashed.mean, summary.stake_slashed.std);
        println!("Welfare: {:.2} ± {:.2}", summary.social_welfare.mean, summary.social_welfare.std);
        println!(
            "Theory: q* = {:.4}, v* = {:.4}, deviation {:.4}",
            summary.q_star_theoretical, summary.v_star_theoretical, summary.deviation
        );
    }

    fn run_attack(name: &str, config: &SimulationConfig, output: Option<PathBuf>) -> Result<()> {
        let periods = config.n_periods;
        let bar = ProgressBar::new_spinner();
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_message(format!("running {} over {} periods", name, periods));

        let results = if name.eq_ignore_ascii_case("all") {
            run_all_attacks(config, periods)?
        } else {
            let scenario = attack_by_name(name, config)?;
            let result = scenario.run(periods)?;
            std::iter::once((result.attack_name.clone(), result)).collect()
        };
        bar.finish_and_clear();

        for result in results.values() {
            print_attack(result);
        }
        if let Some(path) = output {
            write_json(&path, &results)?;
        }
        Ok(())
    }

    fn print_attack(result: &AttackResult) {
        println!("Attack: {}", result.attack_name);
        println!("{}", "-".repeat(40));
        println!(
            "Fraud rate: {:.4} -> {:.4} ({:+.4})",
            result.baseline.fraud_rate, result.attack.fraud_rate, result.fraud_rate_increase
        );
        println!(
            "Detection rate: {:.4} -> {:.4} ({:+.4})",
            result.baseline.detection_rate, result.attack.detection_rate, result.detection_rate_change
        );
        println!("Attacker profit: {:.2}", result.attacker_profit);
        println!("Victim losses: {:+.2}", result.victim_losses);
        println!("Welfare loss: {:.2}", result.social_welfare_loss);
        for (key, value) in &result.attack_specific {
            println!("  {}: {:.4}", key, value);
        }
        println!();
    }

    fn run_equilibrium(
        config: &SimulationConfig,
        payment: Option<f64>,
        stake: f64,
        loss: Option<f64>,
    ) -> Result<()> {
        let protocol = &config.protocol;
        let payment = payment.unwrap_or(protocol.base_payment);
        let loss = loss.unwrap_or(protocol.base_loss);
        let eq = compute_theoretical_equilibrium(protocol, payment, stake, loss);

        println!("Equilibrium at P = {payment}, S = {stake}, L = {loss}");
        println!("==========================================");
        println!("Audit probability v*:      {:.6}", eq.v_star);
        println!("Cheat probability q*:      {:.6}", eq.q_star);
        println!("Incentive threshold θ:     {:.6}", eq.theta);
        println!("Dispute surplus Δ:         {:.4}", eq.delta);
        println!("Audit belief threshold μ*: {:.6}", eq.mu_star);
        println!("Minimum viable stake:      {}", eq.minimum_viable_stake);
        println!("Enforcement viable:        {}", eq.enforcement_viable);
        println!("Incentive compatible:      {}", eq.incentive_compatible);
        println!("Expected detection rate:   {:.6}", eq.expected_detection_rate);
        println!("Expected provider utility: {:.4}", eq.expected_provider_utility);
        println!("Expected client utility:   {:.4}", eq.expected_client_utility);
        Ok(())
    }

    fn run_sensitivity(
        config: &SimulationConfig,
        parameter: &str,
        values: &[f64],
        payment: Option<f64>,
        stake: f64,
        loss: Option<f64>,
        simulate: Option<usize>,
    ) -> Result<()> {
        let field: ProtocolField = parameter.parse()?;
        let payment = payment.unwrap_or(config.protocol.base_payment);
        let loss = loss.unwrap_or(config.protocol.base_loss);
        let sweep = parameter_sensitivity(&config.protocol, field, values, payment, stake, loss);

        println!("Sensitivity of the equilibrium to {}", field);
        println!("{:>12} {:>10} {:>10} {:>10} {:>12}", field.name(), "v*", "q*", "Δ", "min stake");
        for i in 0..sweep.values.len() {
            println!(
                "{:>12.4} {:>10.6} {:>10.6} {:>10.4} {:>12}",
                sweep.values[i],
                sweep.v_star[i],
                sweep.q_star[i],
                sweep.delta[i],
                sweep.minimum_viable_stake[i].to_string()
            );
        }

        if let Some(runs) = simulate {
            println!("\nSimulated ({} seeds per value)", runs);
            let points = run_parameter_sweep(config, field, values, runs)?;
            println!("{:>12} {:>12} {:>10} {:>12}", field.name(), "fraud rate", "std", "welfare");
            for point in points {
                println!(
                    "{:>12.4} {:>12.6} {:>10.6} {:>12.2}",
                    point.value, point.fraud_rate_mean, point.fraud_rate_std, point.welfare_mean
                );
            }
        }
        Ok(())
    }

    fn run_thresholds(config: &SimulationConfig, payments: &[f64]) -> Result<()> {
        let thresholds = stake_thresholds(&config.protocol, payments, config.protocol.base_loss);
        println!("{:>10} {:>14} {:>10} {:>10}", "payment", "min stake", "q*", "v*");
        for t in thresholds {
            println!(
                "{:>10.2} {:>14} {:>10.6} {:>10.6}",
                t.payment,
                t.minimum_viable_stake.to_string(),
                t.q_star_at_min,
                t.v_star_at_min
            );
        }
        Ok(())
    }

    fn run_profitability(
        config: &SimulationConfig,
        payment: Option<f64>,
        stake: f64,
        loss: Option<f64>,
    ) -> Result<()> {
        let protocol = &config.protocol;
        let payment = payment.unwrap_or(protocol.base_payment);
        let loss = loss.unwrap_or(protocol.base_loss);
        let estimates: Vec<_> = [
            ProfitabilityModel::ReputationFarming,
            ProfitabilityModel::NoStakeFloor,
            ProfitabilityModel::Censorship,
        ]
        .into_iter()
        .map(|model| attack_profitability(protocol, payment, stake, loss, model))
        .collect();
        println!("{}", serde_json::to_string_pretty(&estimates)?);
        Ok(())
    }

    fn run_convergence_study(
        config: &SimulationConfig,
        runs: usize,
        tolerance: f64,
        output: Option<PathBuf>,
    ) -> Result<()> {
        let bar = ProgressBar::new_spinner();
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_message(format!("simulating {} seeds", runs));
        let report = run_convergence(config, runs, tolerance)?;
        bar.finish_and_clear();

        print_summary(&report.summary);
        println!(
            "\n{}/{} runs within ±{} of q*: {}",
            report.within_tolerance,
            report.deviations.len(),
            tolerance,
            if report.converged() { "converged" } else { "NOT converged" }
        );
        if let Some(path) = output {
            write_json(&path, &report)?;
        }
        Ok(())
    }
}

#[cfg(feature = "cli")]
fn main() -> anyhow::Result<()> {
    use clap::Parser;

    let cli = cli::Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    cli::run(cli)
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("This binary requires the 'cli' feature. Build with:");
    eprintln!("  cargo build -p hfg-fraud-sim --features cli --bin fraud-sim");
}
