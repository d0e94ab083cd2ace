// =============================================================================
// End-to-end trading flow against the paper broker
// =============================================================================
//
// Exercises the full path the live cycle takes: signal evaluation over
// stored bars, execution through the order manager, and the position
// lifecycle in the store — entry, pyramid with the raised unified stop, and
// the stop-loss exit with realized P&L.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use breakwater::broker::{Broker, PaperBroker};
use breakwater::config::Settings;
use breakwater::execution::OrderManager;
use breakwater::signals::{ProximityWatcher, TurtleSignalEngine};
use breakwater::store::{DailyBar, Store};
use breakwater::types::{Market, PositionStatus, SignalKind, Venue};

// Flat channel with a wide daily range: ATR-20 = 2500, so one unit consumes
// about a quarter of the account and several pyramids stay affordable.
fn flat_bars(n: usize, high: Decimal) -> Vec<DailyBar> {
    let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    (0..n)
        .map(|i| DailyBar {
            date: start + chrono::Days::new(i as u64),
            open: high - dec!(300),
            high,
            low: high - dec!(2500),
            close: high - dec!(200),
            volume: 25_000,
        })
        .collect()
}

struct Flow {
    store: Store,
    broker: Arc<PaperBroker>,
    engine: TurtleSignalEngine,
    order_manager: OrderManager,
    stock_id: i64,
}

async fn flow() -> Flow {
    let settings = Settings::default();
    let store = Store::open_in_memory().unwrap();
    let stock_id = store
        .insert_stock("005930", "Samsung Electronics", Venue::Kospi, Some("Tech"))
        .await
        .unwrap();
    store
        .insert_daily_bars(stock_id, &flat_bars(60, dec!(50000)))
        .await
        .unwrap();

    let broker = Arc::new(PaperBroker::new(dec!(100000000)));
    let engine = TurtleSignalEngine::new(&settings, store.clone());
    let order_manager = OrderManager::new(&settings, broker.clone(), store.clone(), None);

    Flow {
        store,
        broker,
        engine,
        order_manager,
        stock_id,
    }
}

fn prices(stock_id: i64, price: Decimal) -> HashMap<i64, Decimal> {
    let mut map = HashMap::new();
    map.insert(stock_id, price);
    map
}

#[tokio::test]
async fn entry_pyramid_and_stop_loss_round_trip() {
    let mut flow = flow().await;

    // --- Entry: the quote breaks the flat 50000 channel --------------------
    flow.broker.set_price("005930", dec!(50100));
    let entries = flow
        .engine
        .check_entry_signals(&[flow.stock_id], &prices(flow.stock_id, dec!(50100)))
        .await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, SignalKind::EntryS2);

    let result = flow.order_manager.execute_entry(&entries[0]).await.unwrap();
    assert!(result.success, "{}", result.message);
    let entry_qty = result.quantity;
    assert!(entry_qty > 0);

    let position = flow
        .store
        .open_position_by_stock(flow.stock_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(position.units, 1);
    assert_eq!(position.quantity, entry_qty);
    let initial_stop = position.stop_loss_price.unwrap();
    assert!(initial_stop < position.entry_price);

    // The same cycle will not enter again while the position is open.
    let again = flow
        .engine
        .check_entry_signals(&[flow.stock_id], &prices(flow.stock_id, dec!(50100)))
        .await;
    assert!(again.is_empty());

    // --- Pyramid: price advances half an N above the entry ------------------
    flow.broker.set_price("005930", dec!(51400));
    let pyramids = flow
        .engine
        .check_pyramid_signals(Market::Krx, &prices(flow.stock_id, dec!(51400)))
        .await;
    assert_eq!(pyramids.len(), 1);
    assert_eq!(pyramids[0].kind, SignalKind::Pyramid);

    let result = flow
        .order_manager
        .execute_pyramid(&pyramids[0])
        .await
        .unwrap();
    assert!(result.success, "{}", result.message);

    let position = flow
        .store
        .open_position_by_stock(flow.stock_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(position.units, 2);
    assert!(position.quantity > entry_qty);
    // Weighted average sits between the two fills; the unified stop rose.
    assert!(position.entry_price > dec!(50100));
    assert!(position.entry_price < dec!(51400));
    let raised_stop = position.stop_loss_price.unwrap();
    assert!(raised_stop > initial_stop);

    // Weighted-average invariant across the fills (up to division rounding
    // in the stored average).
    let total_cost = dec!(50100) * Decimal::from(entry_qty)
        + dec!(51400) * Decimal::from(position.quantity - entry_qty);
    let recovered = position.entry_price * Decimal::from(position.quantity);
    assert!((recovered - total_cost).abs() < Decimal::ONE);

    // --- Stop-loss: the quote collapses through the unified stop ------------
    let crash = raised_stop - dec!(500);
    flow.broker.set_price("005930", crash);
    let exits = flow
        .engine
        .check_exit_signals(Market::Krx, &prices(flow.stock_id, crash))
        .await;
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].kind, SignalKind::StopLoss);

    // Exits and pyramids never pair on the same position in one cycle.
    let pyramids = flow
        .engine
        .check_pyramid_signals(Market::Krx, &prices(flow.stock_id, crash))
        .await;
    assert!(pyramids.is_empty());

    let quantity = position.quantity;
    let entry_avg = position.entry_price;
    let result = flow.order_manager.execute_exit(&exits[0]).await.unwrap();
    assert!(result.success, "{}", result.message);
    assert_eq!(result.quantity, quantity);
    assert_eq!(result.pnl, Some((crash - entry_avg) * Decimal::from(quantity)));
    assert!(result.pnl.unwrap() < Decimal::ZERO);

    // Closed in the store, flat at the broker.
    let closed = flow.store.closed_positions().await.unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].status, PositionStatus::Closed);
    assert_eq!(closed[0].exit_reason.as_deref(), Some("STOP_LOSS"));
    assert!(flow
        .store
        .open_position_by_stock(flow.stock_id)
        .await
        .unwrap()
        .is_none());
    assert!(flow.broker.get_position("005930").await.unwrap().is_none());

    // The losing System-2 close leaves the S1 winner filter untouched
    // (defaults to true, so S1 entries stay suppressed).
    assert!(flow.engine.previous_s1_winner(flow.stock_id).await.unwrap());
}

#[tokio::test]
async fn proximity_watch_to_fast_entry() {
    let mut flow = flow().await;

    // 0.4 % below the 20-day high: watched rather than entered.
    flow.broker.set_price("005930", dec!(49800));
    let entries = flow
        .engine
        .check_entry_signals(&[flow.stock_id], &prices(flow.stock_id, dec!(49800)))
        .await;
    assert!(entries.is_empty());

    let settings = Settings::default();
    let mut watcher = ProximityWatcher::new(&settings.turtle);
    let snapshot = flow
        .engine
        .proximity_snapshot(flow.stock_id, Some(dec!(49800)))
        .await
        .unwrap()
        .expect("stock should be within the proximity band");
    assert!(!snapshot.targets.is_empty());
    watcher.register(snapshot);

    // Fast-poll tick: the quote crosses the level.
    let snapshot = watcher.get(flow.stock_id).cloned().unwrap();
    let result = watcher.check_breakout(flow.stock_id, dec!(50001)).unwrap();
    let kind = result.kind.unwrap();
    assert!(kind.is_entry());
    assert_eq!(result.breakout_level, Some(dec!(50000)));
    assert_eq!(watcher.watched_count(), 0);

    flow.broker.set_price("005930", dec!(50001));
    let signal = flow
        .engine
        .record_breakout_signal(&snapshot, kind, result.system, dec!(50001), result.breakout_level)
        .await;
    let execution = flow.order_manager.execute_entry(&signal).await.unwrap();
    assert!(execution.success, "{}", execution.message);

    let position = flow
        .store
        .open_position_by_stock(flow.stock_id)
        .await
        .unwrap()
        .unwrap();
    assert!(position.quantity > 0);
    assert_eq!(position.status, PositionStatus::Open);

    // The persisted signal flipped to executed inside the fill transaction.
    let signals = flow.store.recent_signals(1).await.unwrap();
    assert!(signals[0].is_executed);
    assert!(signals[0].kind.is_entry());
}

#[tokio::test]
async fn unit_cap_holds_across_pyramids() {
    let mut flow = flow().await;

    flow.broker.set_price("005930", dec!(50100));
    let entries = flow
        .engine
        .check_entry_signals(&[flow.stock_id], &prices(flow.stock_id, dec!(50100)))
        .await;
    flow.order_manager.execute_entry(&entries[0]).await.unwrap();

    // Drive the price up through every pyramid level and beyond.
    let mut price = dec!(50100);
    for _ in 0..8 {
        price += dec!(600);
        flow.broker.set_price("005930", price);
        let pyramids = flow
            .engine
            .check_pyramid_signals(Market::Krx, &prices(flow.stock_id, price))
            .await;
        for signal in &pyramids {
            // Rejections (slippage, funds, caps) are fine; units must never
            // pass the per-stock maximum.
            let _ = flow.order_manager.execute_pyramid(signal).await;
        }
    }

    let position = flow
        .store
        .open_position_by_stock(flow.stock_id)
        .await
        .unwrap()
        .unwrap();
    assert!(position.units <= 4);
    assert!(flow.store.total_open_units().await.unwrap() <= 20);
}
