// Hardware layout, default speeds, front-end settings

// Motor Driver HAT: PCA9685 on the Pi's primary I2C bus
pub const I2C_BUS: &str = "/dev/i2c-1";
pub const PWM_ADDRESS: u8 = 0x40;
pub const PWM_FREQUENCY_HZ: u16 = 50;

// Motor A (left)
pub const LEFT_PWM_CHANNEL: u8 = 0;
pub const LEFT_DIR_PIN_A: u8 = 1;
pub const LEFT_DIR_PIN_B: u8 = 2;

// Motor B (right), mirrored on the chassis
pub const RIGHT_PWM_CHANNEL: u8 = 5;
pub const RIGHT_DIR_PIN_A: u8 = 3;
pub const RIGHT_DIR_PIN_B: u8 = 4;

// Speeds are duty-cycle percentages
pub const MAX_SPEED: u8 = 100;
pub const DEFAULT_SPEED: u8 = 50;

// Keyboard teleop speed dial
pub const TELEOP_START_SPEED: u8 = 50;
pub const TELEOP_SPEED_STEP: u8 = 10;
pub const TELEOP_MIN_SPEED: u8 = 10;

// Web control panel
pub const WEB_PORT: u16 = 8080;

// Camera encoder (rpicam-apps), MJPEG on stdout
pub const CAMERA_PROGRAM: &str = "rpicam-vid";
pub const CAMERA_WIDTH: u32 = 640;
pub const CAMERA_HEIGHT: u32 = 480;
pub const STREAM_BOUNDARY: &str = "FRAME";

// Reversing beep goes out of the 3.5mm jack
pub const AUDIO_DEVICE: &str = "hw:2,0";

// Gemini vision
pub const VISION_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const VISION_MODEL: &str = "gemini-2.0-flash";
pub const VISION_PROMPT: &str =
    "Describe what you see in this image from a rover's camera. Be concise.";
