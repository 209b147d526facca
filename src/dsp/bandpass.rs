//! Butterworth band-pass filter
//!
//! The band-pass of order `n` is a Butterworth high-pass of order `n` at the
//! low cut followed by a Butterworth low-pass of order `n` at the high cut.
//! Each half is a chain of bilinear-transformed second-order sections, plus
//! one first-order section when `n` is odd. Sections run in transposed
//! direct form II and keep their state between calls to [`BandPass::filter`].

use std::f64::consts::PI;

use crate::error::FilterError;

/// One IIR section, `a0` normalized to 1
#[derive(Debug, Clone)]
struct Section {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Section {
    fn new(b0: f64, b1: f64, b2: f64, a1: f64, a2: f64) -> Self {
        Self {
            b0,
            b1,
            b2,
            a1,
            a2,
            z1: 0.0,
            z2: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y
    }

    fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    LowPass,
    HighPass,
}

/// Butterworth sections for one half of the band-pass
fn butterworth(kind: Kind, order: usize, cutoff: f64, sample_rate: f64) -> Vec<Section> {
    // Pre-warped analog cutoff
    let k = (PI * cutoff / sample_rate).tan();
    let k2 = k * k;
    let mut sections = Vec::with_capacity(order / 2 + 1);

    for pair in 0..order / 2 {
        let q = 1.0 / (2.0 * (PI * (2 * pair + 1) as f64 / (2 * order) as f64).sin());
        let norm = 1.0 / (1.0 + k / q + k2);
        let a1 = 2.0 * (k2 - 1.0) * norm;
        let a2 = (1.0 - k / q + k2) * norm;
        sections.push(match kind {
            Kind::LowPass => {
                let b0 = k2 * norm;
                Section::new(b0, 2.0 * b0, b0, a1, a2)
            }
            Kind::HighPass => Section::new(norm, -2.0 * norm, norm, a1, a2),
        });
    }

    if order % 2 == 1 {
        let a1 = (k - 1.0) / (k + 1.0);
        sections.push(match kind {
            Kind::LowPass => {
                let b0 = k / (k + 1.0);
                Section::new(b0, b0, 0.0, a1, 0.0)
            }
            Kind::HighPass => {
                let b0 = 1.0 / (k + 1.0);
                Section::new(b0, -b0, 0.0, a1, 0.0)
            }
        });
    }

    sections
}

/// Stateful band-pass filter, fed one sample at a time in arrival order
#[derive(Debug, Clone)]
pub struct BandPass {
    sections: Vec<Section>,
    order: usize,
    low_cut: f64,
    high_cut: f64,
}

impl BandPass {
    /// Design a band-pass of `order` passing `low_cut..high_cut` Hz
    pub fn setup(
        order: usize,
        sample_rate: f64,
        low_cut: f64,
        high_cut: f64,
    ) -> Result<Self, FilterError> {
        if order == 0 {
            return Err(FilterError::ZeroOrder);
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(FilterError::SampleRate(sample_rate));
        }
        if !(low_cut < high_cut) {
            return Err(FilterError::EmptyPassband {
                low: low_cut,
                high: high_cut,
            });
        }
        let nyquist = sample_rate / 2.0;
        if !(low_cut > 0.0 && high_cut < nyquist) {
            return Err(FilterError::CutoffRange {
                low: low_cut,
                high: high_cut,
                nyquist,
            });
        }

        let mut sections = butterworth(Kind::HighPass, order, low_cut, sample_rate);
        sections.extend(butterworth(Kind::LowPass, order, high_cut, sample_rate));

        Ok(Self {
            sections,
            order,
            low_cut,
            high_cut,
        })
    }

    /// Filter one sample
    #[inline]
    pub fn filter(&mut self, sample: f64) -> f64 {
        self.sections
            .iter_mut()
            .fold(sample, |x, section| section.process(x))
    }

    /// Clear the filter memory
    pub fn reset(&mut self) {
        self.sections.iter_mut().for_each(Section::reset);
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Passband width in Hz
    pub fn bandwidth(&self) -> f64 {
        self.high_cut - self.low_cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_peak(filter: &mut BandPass, frequency: f64, sample_rate: f64) -> f64 {
        let total = sample_rate as usize;
        (0..total)
            .map(|i| {
                let t = i as f64 / sample_rate;
                filter.filter((2.0 * PI * frequency * t).sin())
            })
            .skip(total / 2)
            .fold(0.0, |peak: f64, y| peak.max(y.abs()))
    }

    #[test]
    fn test_rejects_invalid_design() {
        assert_eq!(
            BandPass::setup(0, 8000.0, 300.0, 3000.0).unwrap_err(),
            FilterError::ZeroOrder
        );
        assert!(matches!(
            BandPass::setup(2, 8000.0, 1000.0, 1000.0),
            Err(FilterError::EmptyPassband { .. })
        ));
        assert!(matches!(
            BandPass::setup(2, 8000.0, 300.0, 4000.0),
            Err(FilterError::CutoffRange { .. })
        ));
        assert!(matches!(
            BandPass::setup(2, 0.0, 300.0, 3000.0),
            Err(FilterError::SampleRate(_))
        ));
    }

    #[test]
    fn test_section_count() {
        let even = BandPass::setup(4, 48000.0, 300.0, 3000.0).unwrap();
        assert_eq!(even.sections.len(), 4);

        let odd = BandPass::setup(3, 48000.0, 300.0, 3000.0).unwrap();
        assert_eq!(odd.sections.len(), 4);
        assert_eq!(odd.order(), 3);
        assert_eq!(odd.bandwidth(), 2700.0);
    }

    #[test]
    fn test_dc_is_blocked() {
        let mut filter = BandPass::setup(1, 8.0, 1.0, 3.0).unwrap();
        let mut last = 1.0;
        for _ in 0..200 {
            last = filter.filter(1.0);
            assert!(last.is_finite());
        }
        assert!(last.abs() < 1e-6);
    }

    #[test]
    fn test_passband_and_stopband() {
        let sample_rate = 48000.0;
        let mut filter = BandPass::setup(2, sample_rate, 300.0, 3000.0).unwrap();
        assert!(sine_peak(&mut filter, 1000.0, sample_rate) > 0.9);

        let mut filter = BandPass::setup(2, sample_rate, 300.0, 3000.0).unwrap();
        assert!(sine_peak(&mut filter, 50.0, sample_rate) < 0.05);

        let mut filter = BandPass::setup(2, sample_rate, 300.0, 3000.0).unwrap();
        assert!(sine_peak(&mut filter, 15000.0, sample_rate) < 0.05);
    }

    #[test]
    fn test_reset_restores_initial_response() {
        let mut filter = BandPass::setup(2, 8000.0, 300.0, 3000.0).unwrap();
        let first: Vec<f64> = (0..16).map(|_| filter.filter(1.0)).collect();
        filter.reset();
        let second: Vec<f64> = (0..16).map(|_| filter.filter(1.0)).collect();
        assert_eq!(first, second);
    }
}
