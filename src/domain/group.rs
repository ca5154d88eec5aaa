//! Stock-group execution model: trade parameters, execution plans, and the
//! deterministic Fibonacci ladder builder (§3, §4.9).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    FirstEntry,
    Entry230,
    BbRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PsType {
    Fixed,
    Dynamic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockRef {
    pub stock_id: String,
    pub symbol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockGroup {
    pub id: i64,
    pub entry_type: EntryType,
    pub status: GroupStatus,
    pub stocks: Vec<StockRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeParameters {
    pub stock_id: String,
    pub starting_price: f64,
    pub stop_loss_percentage: f64,
    pub risk_amount: f64,
    pub trade_side: TradeSide,
    pub ps_type: PsType,
    pub entry_type: EntryType,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelEntryDesc {
    Entry,
    Scale,
    Sl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelEntry {
    pub fib_level: usize,
    pub price: f64,
    pub quantity: i64,
    pub description: String,
    pub ps_type: PsType,
    pub entry_desc: LevelEntryDesc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub parameters: TradeParameters,
    pub levels: Vec<LevelEntry>,
}

/// The six deterministic Fibonacci price levels: SL(0), entry(1), four
/// scale levels (2..5), spaced evenly between entry and the 1.0 extension of
/// the entry-to-SL distance beyond entry (§4.9 step 8).
pub fn fibonacci_prices(entry: f64, sl_percent: f64, side: TradeSide) -> [f64; 6] {
    let sl_decimal = sl_percent / 100.0;
    let sl_distance = entry * sl_decimal;
    let sign = match side {
        TradeSide::Long => 1.0,
        TradeSide::Short => -1.0,
    };
    let sl_price = entry - sign * sl_distance;

    // Scale levels extend past entry in the trade direction, spaced at
    // 25/50/75/100% of the entry-to-SL distance.
    let mut levels = [0.0; 6];
    levels[0] = sl_price;
    levels[1] = entry;
    for (i, frac) in [0.25, 0.5, 0.75, 1.0].into_iter().enumerate() {
        levels[2 + i] = entry + sign * sl_distance * frac;
    }
    levels
}

/// Distributes `position_size` across 5 legs for DYNAMIC sizing:
/// `floor(n/5)` each, with the first `n mod 5` legs receiving +1 (§4.9 step 9).
pub fn distribute_dynamic_quantities(position_size: i64) -> [i64; 5] {
    let base = position_size / 5;
    let remainder = position_size % 5;
    let mut legs = [base; 5];
    for leg in legs.iter_mut().take(remainder as usize) {
        *leg += 1;
    }
    legs
}

/// Builds the six LevelEntries for a position, per ps_type (§4.9 step 9).
pub fn build_level_entries(
    entry: f64,
    sl_percent: f64,
    side: TradeSide,
    position_size: i64,
    ps_type: PsType,
) -> Vec<LevelEntry> {
    let prices = fibonacci_prices(entry, sl_percent, side);

    match ps_type {
        PsType::Fixed => {
            let scale_qty = ((position_size as f64) * 0.10).round() as i64;
            vec![
                LevelEntry {
                    fib_level: 0,
                    price: prices[0],
                    quantity: position_size,
                    description: "stop loss".into(),
                    ps_type,
                    entry_desc: LevelEntryDesc::Sl,
                },
                LevelEntry {
                    fib_level: 1,
                    price: prices[1],
                    quantity: position_size,
                    description: "main entry".into(),
                    ps_type,
                    entry_desc: LevelEntryDesc::Entry,
                },
                LevelEntry {
                    fib_level: 2,
                    price: prices[2],
                    quantity: scale_qty,
                    description: "scale 1".into(),
                    ps_type,
                    entry_desc: LevelEntryDesc::Scale,
                },
                LevelEntry {
                    fib_level: 3,
                    price: prices[3],
                    quantity: scale_qty,
                    description: "scale 2".into(),
                    ps_type,
                    entry_desc: LevelEntryDesc::Scale,
                },
                LevelEntry {
                    fib_level: 4,
                    price: prices[4],
                    quantity: scale_qty,
                    description: "scale 3".into(),
                    ps_type,
                    entry_desc: LevelEntryDesc::Scale,
                },
                LevelEntry {
                    fib_level: 5,
                    price: prices[5],
                    quantity: scale_qty,
                    description: "scale 4".into(),
                    ps_type,
                    entry_desc: LevelEntryDesc::Scale,
                },
            ]
        }
        PsType::Dynamic => {
            let legs = distribute_dynamic_quantities(position_size);
            let mut out = vec![LevelEntry {
                fib_level: 0,
                price: prices[0],
                quantity: legs[0],
                description: "stop loss".into(),
                ps_type,
                entry_desc: LevelEntryDesc::Sl,
            }];
            for (i, qty) in legs.into_iter().enumerate() {
                out.push(LevelEntry {
                    fib_level: i + 1,
                    price: prices[i + 1],
                    quantity: qty,
                    description: format!("entry leg {}", i + 1),
                    ps_type,
                    entry_desc: LevelEntryDesc::Entry,
                });
            }
            out
        }
    }
}
