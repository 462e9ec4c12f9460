use crate::config::VadConfig;
use crate::types::{SampleI16, VadState};

/// Voice Activity Detector (音声区間検出器)
///
/// RMS (Root Mean Square) ベースのシンプルなVAD実装。
/// 音声パワーが閾値を超えたら音声区間と判定し、
/// 下回ってもハングオーバー期間は音声継続とみなす。
///
/// # アルゴリズム
///
/// 1. 各サンプルを正規化 (-1.0 ~ 1.0)
/// 2. RMS (二乗平均平方根) を計算
/// 3. デシベル (dB) に変換: `20 * log10(rms)`
/// 4. 閾値と比較して音声/無音を判定
/// 5. ハングオーバー機構により急激な変化を抑制
///
/// # Examples
///
/// ```
/// # use civic_voice_intake::vad::VoiceActivityDetector;
/// # use civic_voice_intake::config::VadConfig;
/// let config = VadConfig {
///     threshold_db: -40.0,
///     hangover_duration_ms: 500,
/// };
/// let mut vad = VoiceActivityDetector::new(&config, 16000);
///
/// let silence = vec![0i16; 1600];
/// assert!(!vad.process(&silence));
///
/// let voice: Vec<i16> = (0..1600)
///     .map(|i| ((i as f32 * 0.1).sin() * 10000.0) as i16)
///     .collect();
/// assert!(vad.process(&voice));
/// ```
pub struct VoiceActivityDetector {
    /// 音声判定の閾値 (dB)
    threshold_db: f32,

    /// ハングオーバー期間 (ミリ秒)
    hangover_duration_ms: u32,

    /// 現在の状態 (無音/音声)
    state: VadState,

    /// サンプリングレート (Hz)
    sample_rate: u32,

    /// 最後に計算した音量 (dB)
    last_volume_db: f32,
}

impl VoiceActivityDetector {
    pub fn new(config: &VadConfig, sample_rate: u32) -> Self {
        Self {
            threshold_db: config.threshold_db,
            hangover_duration_ms: config.hangover_duration_ms,
            state: VadState::Silence,
            sample_rate,
            last_volume_db: -100.0,
        }
    }

    /// 音声サンプルを処理して音声区間かどうかを判定
    pub fn process(&mut self, samples: &[SampleI16]) -> bool {
        if samples.is_empty() {
            return false;
        }

        let db = rms_to_db(calculate_rms(samples));
        self.last_volume_db = db;

        let duration_ms = (samples.len() as f64 / self.sample_rate as f64 * 1000.0) as u32;
        let is_voice_detected = db > self.threshold_db;

        self.state = match self.state {
            VadState::Silence => {
                if is_voice_detected {
                    log::debug!("VAD: 音声開始検出 (RMS: {:.2} dB)", db);
                    VadState::Voice {
                        hangover_remaining_ms: self.hangover_duration_ms,
                    }
                } else {
                    VadState::Silence
                }
            }
            VadState::Voice {
                hangover_remaining_ms,
            } => {
                if is_voice_detected {
                    VadState::Voice {
                        hangover_remaining_ms: self.hangover_duration_ms,
                    }
                } else if hangover_remaining_ms > duration_ms {
                    VadState::Voice {
                        hangover_remaining_ms: hangover_remaining_ms - duration_ms,
                    }
                } else {
                    log::debug!("VAD: 音声終了検出 (RMS: {:.2} dB)", db);
                    VadState::Silence
                }
            }
        };

        self.is_voice()
    }

    /// 現在の状態を取得
    pub fn get_state(&self) -> VadState {
        self.state
    }

    /// 最新のボリューム（dB）を取得
    pub fn get_last_volume_db(&self) -> f32 {
        self.last_volume_db
    }

    /// 音声区間中かどうか
    pub fn is_voice(&self) -> bool {
        matches!(self.state, VadState::Voice { .. })
    }
}

/// 発話の段階
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UtterancePhase {
    /// まだ発話が始まっていない
    Waiting,
    /// 発話中（ハングオーバー中を含む）
    Speaking,
    /// 発話が終わった（ハングオーバー経過）
    Ended,
}

/// 1回の発話の始まりと終わりを検出する
///
/// 1ターンにつき1つ作成する。一度 `Ended` になったら戻らない。
pub struct EndpointDetector {
    vad: VoiceActivityDetector,
    phase: UtterancePhase,
}

impl EndpointDetector {
    pub fn new(config: &VadConfig, sample_rate: u32) -> Self {
        Self {
            vad: VoiceActivityDetector::new(config, sample_rate),
            phase: UtterancePhase::Waiting,
        }
    }

    /// サンプルを処理して現在の段階を返す
    pub fn push(&mut self, samples: &[SampleI16]) -> UtterancePhase {
        if self.phase == UtterancePhase::Ended {
            return self.phase;
        }

        let is_voice = self.vad.process(samples);
        self.phase = match (self.phase, is_voice) {
            (UtterancePhase::Waiting, true) => UtterancePhase::Speaking,
            (UtterancePhase::Speaking, false) => UtterancePhase::Ended,
            (phase, _) => phase,
        };
        self.phase
    }

    pub fn phase(&self) -> UtterancePhase {
        self.phase
    }

    /// 発話が始まったかどうか
    pub fn speech_started(&self) -> bool {
        self.phase != UtterancePhase::Waiting
    }

    pub fn volume_db(&self) -> f32 {
        self.vad.get_last_volume_db()
    }
}

/// RMS (Root Mean Square) を計算
fn calculate_rms(samples: &[SampleI16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_of_squares: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = s as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    let mean_square = sum_of_squares / samples.len() as f64;
    mean_square.sqrt() as f32
}

/// RMSをデシベル (dB) に変換
fn rms_to_db(rms: f32) -> f32 {
    if rms <= 0.0 {
        return -100.0;
    }
    20.0 * rms.log10()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(hangover_duration_ms: u32) -> VadConfig {
        VadConfig {
            threshold_db: -40.0,
            hangover_duration_ms,
        }
    }

    fn voice() -> Vec<i16> {
        (0..1600)
            .map(|i| ((i as f32 * 0.1).sin() * 10000.0) as i16)
            .collect()
    }

    #[test]
    fn test_silence_detection() {
        let mut vad = VoiceActivityDetector::new(&config(500), 16000);

        let silence = vec![0i16; 1600]; // 100ms分
        assert!(!vad.process(&silence));
        assert_eq!(vad.get_state(), VadState::Silence);
        assert_eq!(vad.get_last_volume_db(), -100.0);
    }

    #[test]
    fn test_hangover() {
        let mut vad = VoiceActivityDetector::new(&config(500), 16000);
        assert!(vad.process(&voice()));

        // 無音に戻っても、ハングオーバー期間中は音声とみなす
        let silence = vec![0i16; 1600];
        assert!(vad.process(&silence));
        assert!(vad.process(&silence));

        let long_silence = vec![0i16; 16000 * 5 / 10]; // 500ms分
        assert!(!vad.process(&long_silence));
        assert_eq!(vad.get_state(), VadState::Silence);
    }

    #[test]
    fn test_low_amplitude_voice() {
        let mut vad = VoiceActivityDetector::new(&config(500), 16000);

        let low_voice: Vec<i16> = (0..1600)
            .map(|i| ((i as f32 * 0.1).sin() * 100.0) as i16)
            .collect();

        assert!(!vad.process(&low_voice));
    }

    #[test]
    fn test_rms_calculation() {
        let samples = vec![1000i16; 1600];
        let rms = calculate_rms(&samples);

        let expected = 1000.0 / i16::MAX as f32;
        assert!((rms - expected).abs() < 0.001);
        assert_eq!(rms_to_db(0.0), -100.0);
    }

    #[test]
    fn test_empty_samples() {
        let mut vad = VoiceActivityDetector::new(&config(500), 16000);
        assert!(!vad.process(&[]));
    }

    #[test]
    fn test_endpoint_waits_for_speech() {
        let mut detector = EndpointDetector::new(&config(200), 16000);
        let silence = vec![0i16; 1600];

        assert_eq!(detector.push(&silence), UtterancePhase::Waiting);
        assert_eq!(detector.push(&silence), UtterancePhase::Waiting);
        assert!(!detector.speech_started());
    }

    #[test]
    fn test_endpoint_detects_end_after_hangover() {
        let mut detector = EndpointDetector::new(&config(200), 16000);
        let silence = vec![0i16; 1600];

        assert_eq!(detector.push(&voice()), UtterancePhase::Speaking);
        assert_eq!(detector.push(&silence), UtterancePhase::Speaking); // 残り100ms
        assert_eq!(detector.push(&silence), UtterancePhase::Ended);

        // 一度終わったら再び話しても戻らない
        assert_eq!(detector.push(&voice()), UtterancePhase::Ended);
        assert!(detector.speech_started());
    }
}
