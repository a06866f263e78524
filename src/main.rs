//! Paper runtime loop.
//!
//! One cooperative cycle: poll the feed, evaluate circuit breakers, drain the
//! event queue through the engine, execute intents, reconcile against
//! storage, persist runtime state. Any error inside a cycle is cycle-fatal:
//! it forces safe mode, is durably recorded, and the loop sleeps and retries.

use std::rc::Rc;

use anyhow::Result;
use serde_json::json;
use tokio::time::{sleep, Duration};

use vigil::breakers::{evaluate, RuntimeSnapshot};
use vigil::bus::EventBus;
use vigil::engine::{Engine, EngineConfig, TIME_EXIT};
use vigil::events::IntentKind;
use vigil::execution::{PaperExecution, SlippageModel};
use vigil::feed::MarketStream;
use vigil::gate::FileGate;
use vigil::lifecycle::{bootstrap_engine_from_db, RunLock};
use vigil::logging::{obj, ts_now, v_num, v_str, JsonlLogger, Level, Logger};
use vigil::metrics::RuntimeMetrics;
use vigil::reconcile::run_check;
use vigil::risk::RiskEngine;
use vigil::state::{now_ts, Config, RuntimeStateFile};
use vigil::storage::{SqliteStore, Storage};
use vigil::strategy::BreakoutStrategy;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let _lock = RunLock::acquire(&cfg.lock_path)?;

    let logger: Rc<dyn Logger> = Rc::new(JsonlLogger::open(&cfg.log_path)?);
    let storage: Rc<dyn Storage> = {
        let store = SqliteStore::open(&cfg.sqlite_path)?;
        store.init()?;
        Rc::new(store)
    };

    let mut stream = MarketStream::new(cfg.universe.clone(), &cfg.data_dir, &cfg.timeframe);
    let mut bus = EventBus::new();
    let mut metrics = RuntimeMetrics::load(&cfg.metrics_path);
    let mut state_file = RuntimeStateFile::load(&cfg.state_path);

    let mut engine = Engine::new(
        Box::new(BreakoutStrategy::new()),
        Box::new(RiskEngine::new(cfg.risk_fraction, cfg.max_daily_loss_r)),
        Box::new(FileGate::new(
            &cfg.regime_labels_path,
            &cfg.gate_verdict_path,
            &cfg.required_regime,
        )),
        storage.clone(),
        logger.clone(),
        EngineConfig {
            equity: cfg.equity,
            max_open_exposure_r: cfg.max_open_exposure_r,
            exit_after_candles: cfg.exit_after_candles,
        },
    );
    // the state file only seeds the safe-mode hint; positions come from the DB
    engine.state.safe_mode = state_file.safe_mode;
    let boot = bootstrap_engine_from_db(&mut engine, storage.as_ref())?;
    logger.log(
        Level::Info,
        "STARTUP",
        obj(&[
            ("open_positions", v_num(boot.open_positions as f64)),
            ("open_exposure_r", v_num(boot.open_exposure_r)),
            ("safe_mode", json!(engine.state.safe_mode)),
            ("universe", json!(&cfg.universe)),
        ]),
    );

    let execution = PaperExecution::new(storage.clone(), SlippageModel::load(&cfg.calibration_path));
    let mut last_reconcile = 0u64;

    loop {
        let t0 = now_ts();
        if let Err(err) = run_cycle(
            &cfg,
            &mut stream,
            &mut bus,
            &mut engine,
            &execution,
            &storage,
            &logger,
            &mut metrics,
            &mut state_file,
            &mut last_reconcile,
        ) {
            engine.state.safe_mode = true;
            if let Err(db_err) = storage.insert_cb(
                "runtime_error",
                "exception",
                "SAFE_AND_ALERT",
                &json!({ "error": err.to_string() }),
            ) {
                logger.log(
                    Level::Error,
                    "CB_PERSIST_FAILED",
                    obj(&[("error", v_str(&db_err.to_string()))]),
                );
            }
            state_file.safe_mode = true;
            let _ = state_file.save(&cfg.state_path);
            logger.log(
                Level::Error,
                "SAFE_RUNTIME_EXCEPTION",
                obj(&[("error", v_str(&format!("{:#}", err)))]),
            );
        }

        let dt = now_ts().saturating_sub(t0);
        let pause = cfg.poll_seconds.saturating_sub(dt).max(1);
        sleep(Duration::from_secs(pause)).await;
    }
}

#[allow(clippy::too_many_arguments)]
fn run_cycle(
    cfg: &Config,
    stream: &mut MarketStream,
    bus: &mut EventBus,
    engine: &mut Engine,
    execution: &PaperExecution,
    storage: &Rc<dyn Storage>,
    logger: &Rc<dyn Logger>,
    metrics: &mut RuntimeMetrics,
    state_file: &mut RuntimeStateFile,
    last_reconcile: &mut u64,
) -> Result<()> {
    let produced = stream.poll(bus)?;

    // An empty poll is treated as stale data for breaker purposes.
    if produced == 0 {
        let snap = RuntimeSnapshot {
            stale_seconds: cfg.breakers.data_stale_seconds + 2.0,
            latency_p95_ms: stream.metrics.feed_latency_ms,
            realized_r_day: engine.realized_r_day(),
            ..Default::default()
        };
        let triggers = evaluate(&snap, &cfg.breakers);
        if !triggers.is_empty() {
            engine.state.safe_mode = true;
            for t in &triggers {
                storage.insert_cb(t.trigger, &t.threshold, t.action, &json!({"instrument": "ALL"}))?;
            }
            logger.log(
                Level::Error,
                "SAFE_MODE",
                obj(&[("triggers", json!(triggers.iter().map(|t| t.trigger).collect::<Vec<_>>()))]),
            );
        }
    }

    while let Some(event) = bus.next() {
        logger.log(
            Level::Info,
            "CANDLE",
            obj(&[
                ("instrument", v_str(&event.instrument)),
                ("tf", v_str(&event.timeframe)),
                ("event_timestamp", v_str(&event.timestamp.to_rfc3339())),
                ("seq_id", v_num(event.sequence_id as f64)),
            ]),
        );

        let snap = RuntimeSnapshot {
            stale_seconds: if produced > 0 {
                0.0
            } else {
                cfg.breakers.data_stale_seconds + 2.0
            },
            latency_p95_ms: stream.metrics.feed_latency_ms,
            realized_r_day: engine.realized_r_day(),
            ..Default::default()
        };
        let triggers = evaluate(&snap, &cfg.breakers);
        if !triggers.is_empty() {
            engine.state.safe_mode = true;
            for t in &triggers {
                storage.insert_cb(
                    t.trigger,
                    &t.threshold,
                    t.action,
                    &json!({"instrument": &event.instrument}),
                )?;
            }
            logger.log(
                Level::Error,
                "SAFE_TRIGGER",
                obj(&[
                    ("instrument", v_str(&event.instrument)),
                    ("triggers", json!(triggers.iter().map(|t| t.trigger).collect::<Vec<_>>())),
                ]),
            );
            // fall through: the engine still runs due exits under safe mode
        } else {
            engine.state.safe_mode = false;
        }

        let decision = engine.process_event(&event)?;

        if let Some(sig) = &decision.signal {
            metrics.signals_generated += 1;
            storage.insert_signal(
                &sig.signal_id,
                &sig.ts,
                &sig.instrument,
                engine.strategy_name(),
                "pending",
                "",
            )?;
        }
        if let Some(reason) = &decision.veto_reason {
            metrics.signals_vetoed += 1;
            if let Some(sig) = &decision.signal {
                storage.insert_signal(
                    &sig.signal_id,
                    &sig.ts,
                    &sig.instrument,
                    engine.strategy_name(),
                    "vetoed",
                    reason,
                )?;
            }
        }

        for intent in &decision.intents {
            match intent.kind {
                IntentKind::Exit => {
                    let (order, fill) = execution.place_order(intent)?;
                    let reason = intent.exit_reason.as_deref().unwrap_or(TIME_EXIT);
                    let (closed, realized_r) =
                        engine.on_exit_filled(intent, fill.fill_px, &intent.event_ts, reason)?;
                    storage.close_trade(&closed, realized_r)?;
                    metrics.orders_sent += 1;
                    metrics.fills += 1;
                    logger.log(
                        Level::Info,
                        "EXIT_ORDER_FILLED",
                        obj(&[
                            ("order", v_str(&order.order_id)),
                            ("position", v_str(&closed.position_id)),
                            ("fill_px", v_num(fill.fill_px)),
                            ("realized_r", v_num(realized_r)),
                        ]),
                    );
                }
                IntentKind::Entry => match execution.place_order(intent) {
                    Ok((order, fill)) => {
                        storage.insert_signal(
                            &intent.signal_id,
                            &intent.event_ts,
                            &intent.instrument,
                            engine.strategy_name(),
                            "taken",
                            "",
                        )?;
                        let position =
                            engine.on_entry_filled(intent, event.sequence_id, fill.fill_px)?;
                        storage.upsert_open_trade(&position)?;
                        metrics.orders_sent += 1;
                        metrics.fills += 1;
                        metrics.add_latency(stream.metrics.feed_latency_ms);
                        logger.log(
                            Level::Info,
                            "ORDER_FILLED",
                            obj(&[
                                ("signal", v_str(&intent.signal_id)),
                                ("order", v_str(&order.order_id)),
                                ("fill_px", v_num(fill.fill_px)),
                                ("qty", v_num(fill.fill_qty)),
                            ]),
                        );
                    }
                    Err(err) => {
                        // release the decision-time reservation, then surface
                        engine.abort_entry(intent)?;
                        return Err(err);
                    }
                },
            }
        }
    }

    if now_ts().saturating_sub(*last_reconcile) >= cfg.reconcile_secs {
        let report = run_check(storage.as_ref(), engine.state.open_positions())?;
        state_file.last_reconcile_ts = Some(ts_now());
        if report.mismatch {
            engine.state.safe_mode = true;
            storage.insert_cb(
                "fill_mismatch",
                &format!("mismatch >={} polls", cfg.breakers.fill_mismatch_polls),
                "SAFE_RECONCILE_OPTIONAL_FLATTEN",
                &json!({
                    "reason": report.reason,
                    "local_open_positions": report.local_open_positions,
                    "db_open_trades": report.db_counts.open_trades,
                }),
            )?;
            logger.log(
                Level::Error,
                "SAFE_RECONCILE",
                obj(&[("reason", v_str(report.reason.unwrap_or("unknown")))]),
            );
        }
        *last_reconcile = now_ts();
    }

    state_file.safe_mode = engine.state.safe_mode;
    state_file.open_exposure_r = engine.state.open_exposure_r;
    state_file.open_positions = engine.state.open_positions();
    state_file.save(&cfg.state_path)?;
    metrics.save(&cfg.metrics_path)?;
    Ok(())
}
