use std::sync::Arc;

use teloxide::Bot;
use tokio::sync::watch;

use crate::ai::LlmScorer;
use crate::config::Config;
use crate::db::{Database, RecordStore, SubscriberStore};
use crate::delivery::{CycleReport, DeliveryDispatcher, DeliveryPipeline, PipelineSettings};
use crate::error::{AppError, Result};
use crate::feed::RssFetcher;
use crate::scheduler::Scheduler;
use crate::telegram::{run_bot, TelegramSender};

pub struct App {
    subscribers: Arc<dyn SubscriberStore>,
    bot: Bot,
    scheduler: Arc<Scheduler>,
    max_subscribers: u32,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        let bot_token = config
            .telegram_bot_token
            .clone()
            .ok_or_else(|| AppError::Config("TELEGRAM_BOT_TOKEN is not set".to_string()))?;
        let api_key = config
            .llm_api_key
            .clone()
            .ok_or_else(|| AppError::Config("LLM_API_KEY is not set".to_string()))?;

        let db = Database::open(&config.db_path).await?;
        let records: Arc<dyn RecordStore> = Arc::new(db.records());
        let subscribers: Arc<dyn SubscriberStore> = Arc::new(db.subscribers());

        let bot = Bot::new(bot_token);
        let fetcher = RssFetcher::new(config.sources.clone(), config.max_age_hours)?;
        let scorer = LlmScorer::new(
            api_key,
            config.llm_model.clone(),
            &config.keywords,
            &config.sources,
        )?;

        let dispatcher = DeliveryDispatcher::new(
            Arc::clone(&subscribers),
            Arc::clone(&records),
            Arc::new(TelegramSender::new(bot.clone())),
            &config.delivery,
        );
        let pipeline = DeliveryPipeline::new(
            Arc::clone(&records),
            Arc::clone(&subscribers),
            Arc::new(scorer),
            dispatcher,
            PipelineSettings {
                relevance_threshold: config.relevance_threshold,
                credibility_threshold: config.credibility_threshold,
                max_items_per_cycle: config.max_items_per_cycle,
                scoring_concurrency: config.delivery.scoring_concurrency,
            },
        );
        let scheduler = Scheduler::new(
            Arc::new(fetcher),
            Arc::new(pipeline),
            config.polling_interval(),
            config.cycle_timeout(),
        );

        Ok(Self {
            subscribers,
            bot,
            scheduler: Arc::new(scheduler),
            max_subscribers: config.max_subscribers,
        })
    }

    /// Runs a single fetch-and-deliver cycle.
    pub async fn run_once(&self) -> Result<CycleReport> {
        self.scheduler.run_once().await
    }

    /// Runs the scheduler and the command bot until Ctrl-C.
    pub async fn run_service(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let scheduler = Arc::clone(&self.scheduler);
        let cycles = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

        // Returns once the dispatcher's Ctrl-C handler fires
        run_bot(self.bot, self.subscribers, self.max_subscribers).await;

        tracing::info!("shutting down, waiting for the current cycle to finish");
        shutdown_tx.send(true).ok();
        cycles
            .await
            .map_err(|e| AppError::Other(anyhow::anyhow!("scheduler task failed: {}", e)))?;
        Ok(())
    }
}

/// Prints store counters without needing API credentials.
pub async fn print_stats(config: &Config) -> Result<()> {
    let db = Database::open(&config.db_path).await?;
    let stats = db.records().stats().await?;
    let active = db.subscribers().count_active().await?;

    println!("Database:           {}", config.db_path);
    println!("Active subscribers: {}", active);
    println!("Items sent:         {}", stats.sent);
    println!("Items rejected:     {}", stats.rejected);
    println!(
        "Deliveries:         {} ({} failed)",
        stats.deliveries, stats.failed_deliveries
    );
    Ok(())
}
