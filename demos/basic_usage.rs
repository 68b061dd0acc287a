// ============================================================================
// Basic Usage Example
// ============================================================================

use exchange_core::prelude::*;
use exchange_core::utils::init_logging;
use rust_decimal::Decimal;
use std::sync::Arc;

fn main() -> ExchangeResult<()> {
    init_logging("exchange_core=info");
    println!("=== Exchange Core Example ===\n");

    let exchange = ExchangeBuilder::new()
        .spot_market("BTC-USD", "BTC", "USD")
        .perpetual_market("BTC-PERP", "BTC", "USD", 20)
        .with_event_handler(Arc::new(LoggingEventHandler))
        .build()?;
    println!("Started symbols: {:?}\n", exchange.symbols());

    let makers: Vec<AccountId> = (1..=5).map(AccountId::new).collect();
    let buyer = AccountId::new(100);
    for maker in &makers {
        exchange.deposit(*maker, "BTC", Decimal::from(2))?;
        exchange.deposit(*maker, "USD", Decimal::from(100_000))?;
    }
    exchange.deposit(buyer, "USD", Decimal::from(200_000))?;

    // Ladder of asks and bids around 50,000
    println!("Adding resting orders...");
    for (i, maker) in makers.iter().enumerate() {
        let offset = Decimal::from(i as u64 * 100);
        exchange.submit_order(NewOrder::limit(
            *maker,
            "BTC-USD",
            Side::Sell,
            Decimal::from(50_000) + offset,
            Decimal::ONE,
        ))?;
        exchange.submit_order(NewOrder::limit(
            *maker,
            "BTC-USD",
            Side::Buy,
            Decimal::from(49_900) - offset,
            Decimal::ONE,
        ))?;
    }

    println!("\n=== Order Book Snapshot ===");
    let snapshot = exchange.order_book_snapshot("BTC-USD", 5)?;
    println!("\nBids:");
    for (price, qty) in &snapshot.bids {
        println!("  {} @ {}", qty, price);
    }
    println!("\nAsks:");
    for (price, qty) in &snapshot.asks {
        println!("  {} @ {}", qty, price);
    }
    println!("\nSpread: {:?}", snapshot.spread);
    println!("Mid Price: {:?}", snapshot.mid_price);

    // Crosses the first three ask levels
    println!("\n=== Submitting Market Order ===");
    let sweep = NewOrder::market(buyer, "BTC-USD", Side::Buy, Decimal::from(3));
    let ack = exchange.submit_order(sweep)?;
    for trade in &ack.trades {
        println!("  Trade: {} @ {} (qty: {})", trade.id, trade.price, trade.quantity);
    }
    println!("Order {:?} is {:?}", ack.order.id, ack.order.status());

    let btc = exchange.balance(buyer, "BTC");
    let usd = exchange.balance(buyer, "USD");
    println!("\nBuyer BTC: {} available", btc.available);
    println!("Buyer USD: {} available, {} locked", usd.available, usd.locked);

    // Deposit tracked to finality on chain
    println!("\n=== Chain Deposit ===");
    let depositor = AccountId::new(200);
    for height in 800_000..800_003u64 {
        let mut block = Block::new(Chain::Bitcoin, height, format!("hash-{}", height));
        if height == 800_000 {
            block = block.with_deposit("deposit-tx", depositor, "BTC", Decimal::new(5, 1));
        }
        exchange.on_block(block)?;
        println!(
            "  height {}: balance {}, incoming {:?}",
            height,
            exchange.balance(depositor, "BTC").total,
            exchange.incoming(depositor).get("BTC")
        );
    }

    println!("\nLedger invariants hold: {}", exchange.check_invariants());
    exchange.shutdown();
    Ok(())
}
