//! Adafruit Mini I2C STEMMA QT Gamepad (product 5743), an ATtiny816 running the seesaw firmware.
//!
//! Seesaw registers are addressed with a module byte and a function byte, reads need a short pause between writing
//! the address and reading the data back.
use core::fmt::Write;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};

pub const ADDRESS: SevenBitAddress = 0x50;
/// Upper half of the version register on the gamepad firmware.
pub const PRODUCT_ID: u16 = 5743;

pub mod reg {
    pub const STATUS_BASE: u8 = 0x00;
    pub const STATUS_HW_ID: u8 = 0x01;
    pub const STATUS_VERSION: u8 = 0x02;
    pub const STATUS_SWRST: u8 = 0x7F;

    pub const GPIO_BASE: u8 = 0x01;
    pub const GPIO_DIRCLR_BULK: u8 = 0x03;
    pub const GPIO_BULK: u8 = 0x04;
    pub const GPIO_BULK_SET: u8 = 0x05;
    pub const GPIO_PULLENSET: u8 = 0x0B;

    pub const ADC_BASE: u8 = 0x09;
    pub const ADC_CHANNEL_OFFSET: u8 = 0x07;
}

/// Pause between the register address and the read, in microseconds.
const READ_DELAY_US: u32 = 250;
/// The adc needs longer to convert.
const ADC_DELAY_US: u32 = 1000;

pub const JOYSTICK_X: u8 = 14;
pub const JOYSTICK_Y: u8 = 15;
/// Joystick at rest, half of the 10 bit adc range.
pub const JOYSTICK_CENTER: u16 = 512;
/// Distance from the center that counts as movement.
pub const JOYSTICK_DEADZONE: u16 = 50;
/// Distance from the center before a direction is shown.
pub const DIRECTION_DEADZONE: u16 = 100;

#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum SeesawError<E: core::fmt::Debug> {
    /// Underlying I2C device error.
    #[error("i2c error {0:?}")]
    I2c(E),
    /// The pin doesn't exist in the bulk registers.
    #[error("invalid pin {0}")]
    InvalidPin(u8),
}
impl<E: core::fmt::Debug> From<E> for SeesawError<E> {
    fn from(e: E) -> Self {
        SeesawError::I2c(e)
    }
}
impl<E: core::fmt::Debug> defmt::Format for SeesawError<E> {
    fn format(&self, f: defmt::Formatter) {
        match *self {
            SeesawError::I2c(ref e) => defmt::write!(f, "SeesawError:I2c({:?})", defmt::Debug2Format(&e)),
            SeesawError::InvalidPin(p) => defmt::write!(f, "SeesawError:InvalidPin({})", p),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
pub enum Button {
    X,
    Y,
    A,
    B,
    Select,
    Start,
}

impl Button {
    /// In the order they are reported.
    pub const ALL: [Button; 6] = [Button::X, Button::Y, Button::A, Button::B, Button::Select, Button::Start];

    /// Seesaw gpio the button is wired to.
    pub const fn pin(&self) -> u8 {
        match self {
            Button::X => 6,
            Button::Y => 2,
            Button::A => 5,
            Button::B => 1,
            Button::Select => 0,
            Button::Start => 16,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Button::X => "X",
            Button::Y => "Y",
            Button::A => "A",
            Button::B => "B",
            Button::Select => "SELECT",
            Button::Start => "START",
        }
    }
}

/// Bulk gpio mask of all buttons.
pub const BUTTON_MASK: u32 = {
    let mut mask = 0;
    let mut i = 0;
    while i < Button::ALL.len() {
        mask |= 1 << Button::ALL[i].pin();
        i += 1;
    }
    mask
};

/// The pressed buttons, decoded from a bulk gpio read.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, defmt::Format)]
pub struct Buttons(u32);

impl Buttons {
    /// Buttons pull the pin low when pressed.
    pub fn from_bulk(bits: u32) -> Self {
        Self(!bits & BUTTON_MASK)
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        self.0 & (1 << button.pin()) != 0
    }

    pub fn any(&self) -> bool {
        self.0 != 0
    }

    pub fn count(&self) -> usize {
        self.pressed().count()
    }

    pub fn pressed(&self) -> impl Iterator<Item = Button> + '_ {
        Button::ALL.into_iter().filter(|b| self.is_pressed(*b))
    }

    /// Write the pressed button names separated by `sep`.
    pub fn write_names<W: Write + ?Sized>(&self, w: &mut W, sep: &str) -> core::fmt::Result {
        for (i, b) in self.pressed().enumerate() {
            if i != 0 {
                w.write_str(sep)?;
            }
            w.write_str(b.name())?;
        }
        Ok(())
    }
}

pub struct Seesaw<I2C, D> {
    bus: I2C,
    delay: D,
    address: SevenBitAddress,
}
impl<I2C, D> core::fmt::Debug for Seesaw<I2C, D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("Seesaw:{}", self.address))
    }
}
impl<I2C, D> defmt::Format for Seesaw<I2C, D> {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Seesaw:{}", self.address)
    }
}

impl<I2C: I2c, D: DelayNs> Seesaw<I2C, D> {
    pub fn new(bus: I2C, delay: D) -> Self {
        Self::with_address(bus, delay, ADDRESS)
    }

    pub fn with_address(bus: I2C, delay: D, address: SevenBitAddress) -> Self {
        Self { bus, delay, address }
    }

    async fn read(&mut self, base: u8, function: u8, buf: &mut [u8], delay_us: u32) -> Result<(), SeesawError<I2C::Error>> {
        self.bus.write(self.address, &[base, function]).await?;
        self.delay.delay_us(delay_us).await;
        self.bus.read(self.address, buf).await?;
        Ok(())
    }

    async fn write(&mut self, base: u8, function: u8, data: &[u8]) -> Result<(), SeesawError<I2C::Error>> {
        let mut buf = [0u8; 6];
        buf[0] = base;
        buf[1] = function;
        buf[2..2 + data.len()].copy_from_slice(data);
        self.bus.write(self.address, &buf[..2 + data.len()]).await?;
        Ok(())
    }

    pub async fn software_reset(&mut self) -> Result<(), SeesawError<I2C::Error>> {
        self.write(reg::STATUS_BASE, reg::STATUS_SWRST, &[0xFF]).await
    }

    pub async fn hardware_id(&mut self) -> Result<u8, SeesawError<I2C::Error>> {
        let mut v = [0u8; 1];
        self.read(reg::STATUS_BASE, reg::STATUS_HW_ID, &mut v, READ_DELAY_US).await?;
        Ok(v[0])
    }

    /// Product id in the upper 16 bits, date code in the lower.
    pub async fn version(&mut self) -> Result<u32, SeesawError<I2C::Error>> {
        let mut v = [0u8; 4];
        self.read(reg::STATUS_BASE, reg::STATUS_VERSION, &mut v, READ_DELAY_US).await?;
        Ok(u32::from_be_bytes(v))
    }

    pub async fn product_id(&mut self) -> Result<u16, SeesawError<I2C::Error>> {
        Ok(((self.version().await? >> 16) & 0xFFFF) as u16)
    }

    /// Make the pins in `mask` inputs with the pull ups enabled.
    pub async fn pin_mode_bulk_input_pullup(&mut self, mask: u32) -> Result<(), SeesawError<I2C::Error>> {
        let m = mask.to_be_bytes();
        self.write(reg::GPIO_BASE, reg::GPIO_DIRCLR_BULK, &m).await?;
        self.write(reg::GPIO_BASE, reg::GPIO_PULLENSET, &m).await?;
        // The output latch selects pull up over pull down.
        self.write(reg::GPIO_BASE, reg::GPIO_BULK_SET, &m).await
    }

    /// Levels of all gpio pins.
    pub async fn digital_read_bulk(&mut self) -> Result<u32, SeesawError<I2C::Error>> {
        let mut v = [0u8; 4];
        self.read(reg::GPIO_BASE, reg::GPIO_BULK, &mut v, READ_DELAY_US).await?;
        Ok(u32::from_be_bytes(v))
    }

    pub async fn buttons(&mut self) -> Result<Buttons, SeesawError<I2C::Error>> {
        Ok(Buttons::from_bulk(self.digital_read_bulk().await?))
    }

    /// 10 bit adc reading of a pin.
    pub async fn analog_read(&mut self, pin: u8) -> Result<u16, SeesawError<I2C::Error>> {
        if pin > 31 {
            return Err(SeesawError::InvalidPin(pin));
        }
        let mut v = [0u8; 2];
        self.read(reg::ADC_BASE, reg::ADC_CHANNEL_OFFSET + pin, &mut v, ADC_DELAY_US)
            .await?;
        Ok(u16::from_be_bytes(v))
    }

    /// Buttons and both joystick axes.
    pub async fn sample(&mut self) -> Result<(Buttons, u16, u16), SeesawError<I2C::Error>> {
        let buttons = self.buttons().await?;
        let x = self.analog_read(JOYSTICK_X).await?;
        let y = self.analog_read(JOYSTICK_Y).await?;
        Ok((buttons, x, y))
    }
}

/// Joystick direction outside the [`DIRECTION_DEADZONE`], None when near the center.
pub fn direction(x: u16, y: u16) -> Option<&'static str> {
    let low = JOYSTICK_CENTER - DIRECTION_DEADZONE;
    let high = JOYSTICK_CENTER + DIRECTION_DEADZONE;
    let horizontal = if x < low { 1 } else if x > high { 2 } else { 0 };
    let vertical = if y < low { 1 } else if y > high { 2 } else { 0 };
    match (horizontal, vertical) {
        (0, 0) => None,
        (1, 0) => Some("LEFT"),
        (2, 0) => Some("RIGHT"),
        (0, 1) => Some("UP"),
        (0, _) => Some("DOWN"),
        (1, 1) => Some("LEFT UP"),
        (1, _) => Some("LEFT DOWN"),
        (_, 1) => Some("RIGHT UP"),
        (_, _) => Some("RIGHT DOWN"),
    }
}

/// One detected input.
#[derive(Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
pub struct Input {
    pub buttons: Buttons,
    pub x: u16,
    pub y: u16,
    pub joystick_moved: bool,
}

impl Input {
    /// `Buttons: X, Y | Joystick: (x, y)`, either part only when it is active.
    pub fn describe<W: Write + ?Sized>(&self, w: &mut W) -> core::fmt::Result {
        if self.buttons.any() {
            w.write_str("Buttons: ")?;
            self.buttons.write_names(w, ", ")?;
            if self.joystick_moved {
                w.write_str(" | ")?;
            }
        }
        if self.joystick_moved {
            write!(w, "Joystick: ({}, {})", self.x, self.y)?;
        }
        Ok(())
    }

    /// Short form for the display, `Button: A`, `Buttons: A+B + Joy: LEFT` or `Joystick: UP`.
    ///
    /// Joystick movement only shows once it leaves the larger [`DIRECTION_DEADZONE`], returns false if there is
    /// nothing to show.
    pub fn describe_short<W: Write + ?Sized>(&self, w: &mut W) -> Result<bool, core::fmt::Error> {
        let direction = direction(self.x, self.y);
        match self.buttons.count() {
            0 => {}
            1 => {
                w.write_str("Button: ")?;
                self.buttons.write_names(w, "+")?;
            }
            _ => {
                w.write_str("Buttons: ")?;
                self.buttons.write_names(w, "+")?;
            }
        }
        if let Some(direction) = direction {
            if self.buttons.any() {
                write!(w, " + Joy: {direction}")?;
            } else {
                write!(w, "Joystick: {direction}")?;
            }
        }
        Ok(self.buttons.any() || direction.is_some())
    }
}

/// Turns raw samples into inputs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
pub struct GamepadTracker {
    last_x: u16,
    last_y: u16,
    /// Number of inputs detected.
    pub count: u32,
}

impl Default for GamepadTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl GamepadTracker {
    pub const fn new() -> Self {
        Self {
            last_x: JOYSTICK_CENTER,
            last_y: JOYSTICK_CENTER,
            count: 0,
        }
    }

    /// Feed a sample, returns the input if a button is pressed or the joystick moved.
    ///
    /// The joystick counts as moved when it is outside the deadzone, or when it changed by more than half the
    /// deadzone since the previous sample.
    pub fn update(&mut self, buttons: Buttons, x: u16, y: u16) -> Option<Input> {
        let off_center = x.abs_diff(JOYSTICK_CENTER) > JOYSTICK_DEADZONE || y.abs_diff(JOYSTICK_CENTER) > JOYSTICK_DEADZONE;
        let changed = x.abs_diff(self.last_x) > JOYSTICK_DEADZONE / 2 || y.abs_diff(self.last_y) > JOYSTICK_DEADZONE / 2;
        self.last_x = x;
        self.last_y = y;
        let joystick_moved = off_center || changed;
        if !buttons.any() && !joystick_moved {
            return None;
        }
        self.count += 1;
        Some(Input {
            buttons,
            x,
            y,
            joystick_moved,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use embedded_hal_async::i2c::{ErrorKind, ErrorType, Operation};

    struct NoDelay;
    impl DelayNs for NoDelay {
        async fn delay_ns(&mut self, _ns: u32) {}
    }

    /// Seesaw with fixed register contents, keyed by module and function.
    #[derive(Default)]
    struct MockSeesaw {
        selected: (u8, u8),
        version: u32,
        gpio: u32,
        adc: [u16; 32],
        writes: Vec<Vec<u8>>,
    }
    impl ErrorType for MockSeesaw {
        type Error = ErrorKind;
    }
    impl I2c for MockSeesaw {
        async fn transaction(&mut self, address: SevenBitAddress, operations: &mut [Operation<'_>]) -> Result<(), ErrorKind> {
            assert_eq!(address, ADDRESS);
            for op in operations.iter_mut() {
                match op {
                    Operation::Write(data) => {
                        self.selected = (data[0], data[1]);
                        if data.len() > 2 {
                            self.writes.push(data.to_vec());
                        }
                    }
                    Operation::Read(buf) => {
                        let value: Vec<u8> = match self.selected {
                            (reg::STATUS_BASE, reg::STATUS_HW_ID) => vec![0x87],
                            (reg::STATUS_BASE, reg::STATUS_VERSION) => self.version.to_be_bytes().to_vec(),
                            (reg::GPIO_BASE, reg::GPIO_BULK) => self.gpio.to_be_bytes().to_vec(),
                            (reg::ADC_BASE, f) => self.adc[(f - reg::ADC_CHANNEL_OFFSET) as usize].to_be_bytes().to_vec(),
                            _ => return Err(ErrorKind::Other),
                        };
                        buf.copy_from_slice(&value[..buf.len()]);
                    }
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_button_mask() {
        assert_eq!(BUTTON_MASK, (1 << 6) | (1 << 2) | (1 << 5) | (1 << 1) | (1 << 0) | (1 << 16));
        // Active low, everything high means nothing pressed.
        assert!(!Buttons::from_bulk(0xFFFF_FFFF).any());
        let b = Buttons::from_bulk(!((1 << 5) | (1 << 16)));
        assert!(b.is_pressed(Button::A));
        assert!(b.is_pressed(Button::Start));
        assert!(!b.is_pressed(Button::X));
        assert_eq!(b.count(), 2);
    }

    #[test]
    fn test_seesaw() -> Result<(), Box<dyn std::error::Error>> {
        smol::block_on(async || -> Result<(), Box<dyn std::error::Error>> {
            let mut bus = MockSeesaw {
                version: (5743 << 16) | 0x1234,
                gpio: !(1 << 6),
                ..Default::default()
            };
            bus.adc[14] = 100;
            bus.adc[15] = 1000;
            let mut pad = Seesaw::new(bus, NoDelay);
            assert_eq!(pad.hardware_id().await?, 0x87);
            assert_eq!(pad.product_id().await?, PRODUCT_ID);

            pad.pin_mode_bulk_input_pullup(BUTTON_MASK).await?;
            let m = BUTTON_MASK.to_be_bytes();
            assert_eq!(
                pad.bus.writes,
                vec![
                    [&[reg::GPIO_BASE, reg::GPIO_DIRCLR_BULK][..], &m[..]].concat(),
                    [&[reg::GPIO_BASE, reg::GPIO_PULLENSET][..], &m[..]].concat(),
                    [&[reg::GPIO_BASE, reg::GPIO_BULK_SET][..], &m[..]].concat(),
                ]
            );

            let (buttons, x, y) = pad.sample().await?;
            assert_eq!(buttons.pressed().collect::<Vec<_>>(), vec![Button::X]);
            assert_eq!((x, y), (100, 1000));
            assert!(matches!(pad.analog_read(40).await, Err(SeesawError::InvalidPin(40))));
            Ok(())
        }())
    }

    #[test]
    fn test_tracker() {
        let mut t = GamepadTracker::new();
        let none = Buttons::default();
        assert_eq!(t.update(none, 512, 512), None);
        // Within the deadzone and a small change.
        assert_eq!(t.update(none, 530, 500), None);
        // Change of more than half the deadzone, still inside it.
        let input = t.update(none, 560, 500).unwrap();
        assert!(input.joystick_moved);
        assert_eq!(t.count, 1);
        // Held in the same spot is no longer movement.
        assert_eq!(t.update(none, 560, 500), None);

        let pressed = Buttons::from_bulk(!((1 << 6) | (1 << 2)));
        let input = t.update(pressed, 560, 500).unwrap();
        let mut s = String::new();
        input.describe(&mut s).unwrap();
        assert_eq!(s, "Buttons: X, Y");

        let input = t.update(pressed, 900, 100).unwrap();
        let mut s = String::new();
        input.describe(&mut s).unwrap();
        assert_eq!(s, "Buttons: X, Y | Joystick: (900, 100)");
        assert_eq!(t.count, 3);
    }

    #[test]
    fn test_describe_short() {
        let describe = |bits: u32, x: u16, y: u16| {
            let input = Input {
                buttons: Buttons::from_bulk(!bits),
                x,
                y,
                joystick_moved: true,
            };
            let mut s = String::new();
            let shown = input.describe_short(&mut s).unwrap();
            (shown, s)
        };
        assert_eq!(describe(1 << 5, 512, 512), (true, "Button: A".to_owned()));
        assert_eq!(describe((1 << 5) | (1 << 1), 300, 512), (true, "Buttons: A+B + Joy: LEFT".to_owned()));
        assert_eq!(describe(0, 512, 700), (true, "Joystick: DOWN".to_owned()));
        assert_eq!(describe(0, 700, 300), (true, "Joystick: RIGHT UP".to_owned()));
        // Movement inside the larger deadzone has nothing to show.
        assert_eq!(describe(0, 580, 512), (false, String::new()));
    }
}
