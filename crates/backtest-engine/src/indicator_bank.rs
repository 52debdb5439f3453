use std::collections::HashMap;
use std::rc::Rc;

use strategy_core::Bar;
use technical_indicators::{atr, ema, rolling_max, rolling_min, rsi, sma, Series};

/// Per-run memo of indicator arrays.
///
/// Several strategies (and the execution simulator) often share an indicator
/// period; each (indicator, period) pair is computed once per run and handed
/// out as a cheap `Rc` clone.
pub struct IndicatorBank<'a> {
    bars: &'a [Bar],
    closes: Vec<f64>,
    highs: Vec<f64>,
    lows: Vec<f64>,
    atr_memo: HashMap<usize, Rc<Series>>,
    ema_memo: HashMap<usize, Rc<Series>>,
    sma_memo: HashMap<usize, Rc<Series>>,
    rsi_memo: HashMap<usize, Rc<Series>>,
    high_max_memo: HashMap<usize, Rc<Series>>,
    low_min_memo: HashMap<usize, Rc<Series>>,
}

impl<'a> IndicatorBank<'a> {
    pub fn new(bars: &'a [Bar]) -> Self {
        Self {
            bars,
            closes: bars.iter().map(|b| b.close).collect(),
            highs: bars.iter().map(|b| b.high).collect(),
            lows: bars.iter().map(|b| b.low).collect(),
            atr_memo: HashMap::new(),
            ema_memo: HashMap::new(),
            sma_memo: HashMap::new(),
            rsi_memo: HashMap::new(),
            high_max_memo: HashMap::new(),
            low_min_memo: HashMap::new(),
        }
    }

    pub fn bars(&self) -> &'a [Bar] {
        self.bars
    }

    pub fn atr(&mut self, period: usize) -> Rc<Series> {
        let bars = self.bars;
        Rc::clone(
            self.atr_memo
                .entry(period)
                .or_insert_with(|| Rc::new(atr(bars, period))),
        )
    }

    pub fn ema(&mut self, period: usize) -> Rc<Series> {
        let closes = &self.closes;
        Rc::clone(
            self.ema_memo
                .entry(period)
                .or_insert_with(|| Rc::new(ema(closes, period))),
        )
    }

    pub fn sma(&mut self, period: usize) -> Rc<Series> {
        let closes = &self.closes;
        Rc::clone(
            self.sma_memo
                .entry(period)
                .or_insert_with(|| Rc::new(sma(closes, period))),
        )
    }

    pub fn rsi(&mut self, period: usize) -> Rc<Series> {
        let closes = &self.closes;
        Rc::clone(
            self.rsi_memo
                .entry(period)
                .or_insert_with(|| Rc::new(rsi(closes, period))),
        )
    }

    /// Rolling high of the `window` bars strictly before each index.
    pub fn prior_high(&mut self, window: usize) -> Rc<Series> {
        let highs = &self.highs;
        Rc::clone(
            self.high_max_memo
                .entry(window)
                .or_insert_with(|| Rc::new(rolling_max(highs, window))),
        )
    }

    /// Rolling low of the `window` bars strictly before each index.
    pub fn prior_low(&mut self, window: usize) -> Rc<Series> {
        let lows = &self.lows;
        Rc::clone(
            self.low_min_memo
                .entry(window)
                .or_insert_with(|| Rc::new(rolling_min(lows, window))),
        )
    }
}
