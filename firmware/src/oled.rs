//! Drawing for the 128x64 SSD1306 OLED, the display test suite and the gamepad screen.
//!
//! Everything draws on an [`embedded_graphics`] target, the panel specific bits (flush, power, invert) go through
//! [`DisplayControl`] so the suite runs against the [`TestCanvas`] in the tests.
use embedded_graphics::mono_font::ascii::FONT_5X8;
use embedded_graphics::mono_font::MonoTextStyle;
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{Line, PrimitiveStyle, Rectangle};
use embedded_graphics::text::{Baseline, Text};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{I2c, SevenBitAddress};
use ssd1306::mode::{BufferedGraphicsModeAsync, DisplayConfigAsync};
use ssd1306::prelude::{DisplayRotation, DisplaySize128x64, I2CInterface};
use ssd1306::Ssd1306Async;

pub const WIDTH: i32 = 128;
pub const HEIGHT: i32 = 64;
/// Adafruit 938 default address, on GP0 / GP1.
pub const ADDRESS: SevenBitAddress = 0x3C;
/// Address of the display next to the gamepad, on the STEMMA bus.
pub const GAMEPAD_DISPLAY_ADDRESS: SevenBitAddress = 0x3D;

/// Panel operations besides drawing.
#[allow(async_fn_in_trait)]
pub trait DisplayControl: DrawTarget<Color = BinaryColor> {
    /// Send the frame buffer to the panel.
    async fn flush(&mut self) -> Result<(), Self::Error>;
    async fn set_power(&mut self, on: bool) -> Result<(), Self::Error>;
    async fn set_invert(&mut self, invert: bool) -> Result<(), Self::Error>;
}

pub type Oled<I2C> = Ssd1306Async<I2CInterface<I2C>, DisplaySize128x64, BufferedGraphicsModeAsync<DisplaySize128x64>>;

impl<I2C: I2c> DisplayControl for Oled<I2C> {
    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ssd1306Async::flush(self).await
    }
    async fn set_power(&mut self, on: bool) -> Result<(), Self::Error> {
        self.set_display_on(on).await
    }
    async fn set_invert(&mut self, invert: bool) -> Result<(), Self::Error> {
        Ssd1306Async::set_invert(self, invert).await
    }
}

/// Set up the panel at `address`, cleared and ready to draw.
pub async fn init_display<I2C: I2c>(i2c: I2C, address: SevenBitAddress) -> Result<Oled<I2C>, display_interface::DisplayError> {
    let interface = I2CInterface::new(i2c, address, 0x40);
    let mut d = Ssd1306Async::new(interface, DisplaySize128x64, DisplayRotation::Rotate0).into_buffered_graphics_mode();
    d.init().await?;
    d.clear_buffer();
    d.flush().await?;
    Ok(d)
}

fn style() -> MonoTextStyle<'static, BinaryColor> {
    MonoTextStyle::new(&FONT_5X8, BinaryColor::On)
}

fn on() -> PrimitiveStyle<BinaryColor> {
    PrimitiveStyle::with_stroke(BinaryColor::On, 1)
}

/// Text with its top left corner at `x`, `y`.
pub fn text<D: DrawTarget<Color = BinaryColor>>(d: &mut D, s: &str, x: i32, y: i32) -> Result<(), D::Error> {
    Text::with_baseline(s, Point::new(x, y), style(), Baseline::Top).draw(d)?;
    Ok(())
}

/// Horizontal line of `w` pixels.
pub fn hline<D: DrawTarget<Color = BinaryColor>>(d: &mut D, x: i32, y: i32, w: i32) -> Result<(), D::Error> {
    Line::new(Point::new(x, y), Point::new(x + w - 1, y)).into_styled(on()).draw(d)
}

/// Vertical line of `h` pixels.
pub fn vline<D: DrawTarget<Color = BinaryColor>>(d: &mut D, x: i32, y: i32, h: i32) -> Result<(), D::Error> {
    Line::new(Point::new(x, y), Point::new(x, y + h - 1)).into_styled(on()).draw(d)
}

pub fn rect<D: DrawTarget<Color = BinaryColor>>(d: &mut D, x: i32, y: i32, w: u32, h: u32) -> Result<(), D::Error> {
    Rectangle::new(Point::new(x, y), Size::new(w, h)).into_styled(on()).draw(d)
}

pub fn fill_rect<D: DrawTarget<Color = BinaryColor>>(d: &mut D, x: i32, y: i32, w: u32, h: u32) -> Result<(), D::Error> {
    Rectangle::new(Point::new(x, y), Size::new(w, h))
        .into_styled(PrimitiveStyle::with_fill(BinaryColor::On))
        .draw(d)
}

pub fn pixel<D: DrawTarget<Color = BinaryColor>>(d: &mut D, x: i32, y: i32) -> Result<(), D::Error> {
    Pixel(Point::new(x, y), BinaryColor::On).draw(d)
}

pub fn text_screen<D: DrawTarget<Color = BinaryColor>>(d: &mut D) -> Result<(), D::Error> {
    d.clear(BinaryColor::Off)?;
    text(d, "Hello World!", 0, 0)?;
    text(d, "Line 2", 0, 10)?;
    text(d, "Line 3", 0, 20)?;
    text(d, "Center", 40, 30)?;
    text(d, "Bottom", 20, 55)
}

/// The four corners and a cross in the middle.
pub fn pixels<D: DrawTarget<Color = BinaryColor>>(d: &mut D) -> Result<(), D::Error> {
    d.clear(BinaryColor::Off)?;
    pixel(d, 0, 0)?;
    pixel(d, WIDTH - 1, 0)?;
    pixel(d, 0, HEIGHT - 1)?;
    pixel(d, WIDTH - 1, HEIGHT - 1)?;
    let (cx, cy) = (WIDTH / 2, HEIGHT / 2);
    for i in -5..=5 {
        pixel(d, cx + i, cy)?;
        pixel(d, cx, cy + i)?;
    }
    Ok(())
}

/// Some free lines above a grid in the bottom part.
pub fn lines<D: DrawTarget<Color = BinaryColor>>(d: &mut D) -> Result<(), D::Error> {
    d.clear(BinaryColor::Off)?;
    hline(d, 10, 10, 50)?;
    hline(d, 10, 20, 30)?;
    vline(d, 70, 10, 40)?;
    vline(d, 80, 10, 20)?;
    for x in (0..WIDTH).step_by(16) {
        vline(d, x, 45, 15)?;
    }
    for y in (45..60).step_by(5) {
        hline(d, 0, y, WIDTH)?;
    }
    Ok(())
}

pub fn rectangles<D: DrawTarget<Color = BinaryColor>>(d: &mut D) -> Result<(), D::Error> {
    d.clear(BinaryColor::Off)?;
    rect(d, 5, 5, 30, 20)?;
    rect(d, 40, 5, 25, 15)?;
    fill_rect(d, 70, 5, 20, 25)?;
    fill_rect(d, 95, 10, 15, 15)?;
    // Nested.
    rect(d, 10, 35, 50, 25)?;
    rect(d, 15, 40, 40, 15)?;
    fill_rect(d, 20, 45, 30, 5)
}

/// A dot moving along a line, `x` runs from 0 to the width.
pub fn animation_frame<D: DrawTarget<Color = BinaryColor>>(d: &mut D, x: i32) -> Result<(), D::Error> {
    d.clear(BinaryColor::Off)?;
    text(d, "Animation", 30, 10)?;
    pixel(d, x, 30)
}

/// A progress bar filled `width` pixels out of 100.
pub fn progress_frame<D: DrawTarget<Color = BinaryColor>>(d: &mut D, width: u32) -> Result<(), D::Error> {
    d.clear(BinaryColor::Off)?;
    text(d, "Progress", 30, 20)?;
    rect(d, 10, 35, 100, 10)?;
    if width > 2 {
        fill_rect(d, 11, 36, width - 2, 8)?;
    }
    Ok(())
}

/// The tests of the display suite, in the order they run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
pub enum OledTest {
    Clear,
    Text,
    Pixels,
    Lines,
    Shapes,
    Power,
    Animation,
}

impl OledTest {
    pub const ALL: [OledTest; 7] = [
        OledTest::Clear,
        OledTest::Text,
        OledTest::Pixels,
        OledTest::Lines,
        OledTest::Shapes,
        OledTest::Power,
        OledTest::Animation,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            OledTest::Clear => "display clear",
            OledTest::Text => "text output",
            OledTest::Pixels => "pixel graphics",
            OledTest::Lines => "line graphics",
            OledTest::Shapes => "shape graphics",
            OledTest::Power => "power functions",
            OledTest::Animation => "animation",
        }
    }

    /// Draw the test and hold it on screen for a moment.
    pub async fn run<D: DisplayControl, T: DelayNs>(&self, d: &mut D, delay: &mut T) -> Result<(), D::Error> {
        match self {
            OledTest::Clear => {
                for color in [BinaryColor::Off, BinaryColor::On] {
                    d.clear(color)?;
                    d.flush().await?;
                    delay.delay_ms(1000).await;
                }
                d.clear(BinaryColor::Off)?;
                d.flush().await
            }
            OledTest::Text => {
                text_screen(d)?;
                d.flush().await?;
                delay.delay_ms(3000).await;
                Ok(())
            }
            OledTest::Pixels | OledTest::Lines | OledTest::Shapes => {
                match self {
                    OledTest::Pixels => pixels(d)?,
                    OledTest::Lines => lines(d)?,
                    _ => rectangles(d)?,
                }
                d.flush().await?;
                delay.delay_ms(2000).await;
                Ok(())
            }
            OledTest::Power => {
                d.clear(BinaryColor::Off)?;
                text(d, "Power Test", 20, 25)?;
                d.flush().await?;
                delay.delay_ms(1000).await;
                d.set_invert(true).await?;
                delay.delay_ms(1000).await;
                d.set_invert(false).await?;
                delay.delay_ms(1000).await;
                d.set_power(false).await?;
                delay.delay_ms(2000).await;
                d.set_power(true).await?;
                delay.delay_ms(1000).await;
                Ok(())
            }
            OledTest::Animation => {
                for x in (0..WIDTH - 1).step_by(2) {
                    animation_frame(d, x)?;
                    d.flush().await?;
                    delay.delay_ms(50).await;
                }
                for width in (0..=100).step_by(5) {
                    progress_frame(d, width)?;
                    d.flush().await?;
                    delay.delay_ms(100).await;
                }
                Ok(())
            }
        }
    }
}

/// Run every test, `report` is called with the outcome of each. Returns the number that passed.
pub async fn run_suite<D: DisplayControl, T: DelayNs>(
    d: &mut D,
    delay: &mut T,
    mut report: impl FnMut(OledTest, Result<(), D::Error>),
) -> usize {
    let mut passed = 0;
    for test in OledTest::ALL {
        let r = test.run(d, delay).await;
        if r.is_ok() {
            passed += 1;
        }
        report(test, r);
        delay.delay_ms(500).await;
    }
    let _ = d.clear(BinaryColor::Off);
    let _ = text(d, "Tests Complete", 10, 25);
    let _ = d.flush().await;
    passed
}

/// Title, last input and a status line, as shown next to the gamepad.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GamepadScreen {
    pub input: heapless::String<32>,
    pub status: heapless::String<24>,
}

impl Default for GamepadScreen {
    fn default() -> Self {
        let mut s = Self {
            input: heapless::String::new(),
            status: heapless::String::new(),
        };
        s.set("Press any button", "Ready");
        s
    }
}

impl GamepadScreen {
    pub const TITLE: &'static str = "Gamepad Test";

    /// Shown until the first input arrives.
    pub fn startup(&mut self) {
        self.set("Waiting for input...", "Ready");
    }

    /// Replace the lines, text that doesn't fit is cut off.
    pub fn set(&mut self, input: &str, status: &str) {
        self.input.clear();
        self.status.clear();
        for c in input.chars() {
            if self.input.push(c).is_err() {
                break;
            }
        }
        for c in status.chars() {
            if self.status.push(c).is_err() {
                break;
            }
        }
    }

    /// Show an input and the running count.
    pub fn show_input(&mut self, input: &str, count: u32) {
        let mut status: heapless::String<24> = heapless::String::new();
        let _ = core::fmt::write(&mut status, format_args!("Count: {count}"));
        self.set(input, &status);
    }

    pub fn draw<D: DrawTarget<Color = BinaryColor>>(&self, d: &mut D) -> Result<(), D::Error> {
        d.clear(BinaryColor::Off)?;
        text(d, Self::TITLE, 20, 4)?;
        text(d, &self.input, 5, 26)?;
        text(d, &self.status, 5, 46)
    }
}

/// Frame buffer for the tests, records the panel operations.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct TestCanvas {
    pub pixels: [[bool; WIDTH as usize]; HEIGHT as usize],
    pub flushes: usize,
    pub power: bool,
    pub inverted: bool,
    /// Power and invert changes, in order.
    pub operations: Vec<&'static str>,
}

#[cfg(test)]
impl Default for TestCanvas {
    fn default() -> Self {
        Self {
            pixels: [[false; WIDTH as usize]; HEIGHT as usize],
            flushes: 0,
            power: true,
            inverted: false,
            operations: vec![],
        }
    }
}

#[cfg(test)]
impl TestCanvas {
    pub fn get(&self, x: i32, y: i32) -> bool {
        self.pixels[y as usize][x as usize]
    }
    pub fn count(&self) -> usize {
        self.pixels.iter().flatten().filter(|p| **p).count()
    }
    /// Lit pixels within the rectangle.
    pub fn count_in(&self, x: i32, y: i32, w: i32, h: i32) -> usize {
        (y..y + h)
            .flat_map(|yy| (x..x + w).map(move |xx| (xx, yy)))
            .filter(|(xx, yy)| self.get(*xx, *yy))
            .count()
    }
}

#[cfg(test)]
impl OriginDimensions for TestCanvas {
    fn size(&self) -> Size {
        Size::new(WIDTH as u32, HEIGHT as u32)
    }
}

#[cfg(test)]
impl DrawTarget for TestCanvas {
    type Color = BinaryColor;
    type Error = core::convert::Infallible;
    fn draw_iter<I: IntoIterator<Item = Pixel<BinaryColor>>>(&mut self, pixels: I) -> Result<(), Self::Error> {
        for Pixel(p, c) in pixels {
            if (0..WIDTH).contains(&p.x) && (0..HEIGHT).contains(&p.y) {
                self.pixels[p.y as usize][p.x as usize] = c.is_on();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
impl DisplayControl for TestCanvas {
    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.flushes += 1;
        Ok(())
    }
    async fn set_power(&mut self, on: bool) -> Result<(), Self::Error> {
        self.power = on;
        self.operations.push(if on { "on" } else { "off" });
        Ok(())
    }
    async fn set_invert(&mut self, invert: bool) -> Result<(), Self::Error> {
        self.inverted = invert;
        self.operations.push(if invert { "invert" } else { "normal" });
        Ok(())
    }
}
