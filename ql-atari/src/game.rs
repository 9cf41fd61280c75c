use std::cell::Cell;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{imageops, GrayImage, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use ql::frame::Frame;
use ql::prelude::{ActionId, Environment, QlError};

const BACKGROUND: Luma<u8> = Luma([0]);
const BALL: Luma<u8> = Luma([255]);
const PADDLE: Luma<u8> = Luma([160]);

/// Description of a catch game, read from a JSON file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameDefinition {
    pub name: String,
    /// Field size in cells
    pub columns: usize,
    pub rows: usize,
    /// Edge length of a cell in pixels on the rendered field
    pub cell_size: u32,
    /// Size of the screens handed out to the agent
    pub output_height: usize,
    pub output_width: usize,
    /// Paddle width in cells
    pub paddle_width: usize,
    pub lives: u32,
    /// Fixed seed for the ball positions; random if absent
    pub seed: Option<u64>,
}

impl Default for GameDefinition {
    fn default() -> Self {
        Self {
            name: "catch".to_string(),
            columns: 10,
            rows: 12,
            cell_size: 8,
            output_height: 84,
            output_width: 84,
            paddle_width: 3,
            lives: 3,
            seed: None,
        }
    }
}

impl GameDefinition {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("failed to open game definition {}", path.display()))?;
        let definition: GameDefinition =
            serde_json::from_reader(BufReader::new(file)).with_context(|| format!("invalid game definition {}", path.display()))?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rows < 2 || self.columns == 0 {
            return Err(QlError(format!("a field of {}x{} cells is too small", self.columns, self.rows)).into());
        }
        if self.paddle_width == 0 || self.paddle_width > self.columns {
            return Err(QlError(format!("paddle width {} does not fit into {} columns", self.paddle_width, self.columns)).into());
        }
        if self.cell_size == 0 || self.output_height == 0 || self.output_width == 0 {
            return Err(QlError::from("cell and output sizes must be positive").into());
        }
        if self.lives == 0 {
            return Err(QlError::from("a game needs at least one life").into());
        }
        Ok(())
    }
}

/// Actions of the catch game with their ALE codes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CatchAction {
    Noop,
    Right,
    Left,
}

impl CatchAction {
    pub const ALL: [CatchAction; 3] = [CatchAction::Noop, CatchAction::Right, CatchAction::Left];

    pub fn code(self) -> ActionId {
        match self {
            CatchAction::Noop => 0,
            CatchAction::Right => 3,
            CatchAction::Left => 4,
        }
    }

    pub fn try_from_code(code: ActionId) -> Result<Self> {
        match code {
            0 => Ok(CatchAction::Noop),
            3 => Ok(CatchAction::Right),
            4 => Ok(CatchAction::Left),
            _ => Err(QlError(format!("action code {} is not part of the game", code)).into()),
        }
    }
}

impl Display for CatchAction {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A ball falls down one row per step; the paddle on the bottom row has to catch it.
///
/// Catching pays +1, missing costs -1 and a life. The game is over when no life is left.
pub struct CatchGame {
    definition: GameDefinition,
    rng: StdRng,
    /// (column, row)
    ball: (usize, usize),
    /// leftmost paddle column
    paddle: usize,
    lives: u32,
    score: i32,
    recorded_frames: Cell<usize>,
}

impl CatchGame {
    pub fn new(definition: GameDefinition) -> Result<Self> {
        definition.validate()?;
        let rng = match definition.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut game = Self {
            rng,
            ball: (0, 0),
            paddle: 0,
            lives: definition.lives,
            score: 0,
            recorded_frames: Cell::new(0),
            definition,
        };
        game.start();
        Ok(game)
    }

    pub fn definition(&self) -> &GameDefinition { &self.definition }

    pub fn score(&self) -> i32 { self.score }

    pub fn lives(&self) -> u32 { self.lives }

    pub fn ball(&self) -> (usize, usize) { self.ball }

    pub fn paddle(&self) -> usize { self.paddle }

    fn start(&mut self) {
        self.paddle = (self.definition.columns - self.definition.paddle_width) / 2;
        self.lives = self.definition.lives;
        self.score = 0;
        self.drop_ball();
    }

    fn drop_ball(&mut self) { self.ball = (self.rng.gen_range(0..self.definition.columns), 0) }

    fn move_paddle(
        &mut self,
        action: CatchAction,
    ) {
        let max = self.definition.columns - self.definition.paddle_width;
        self.paddle = match action {
            CatchAction::Noop => self.paddle,
            CatchAction::Right => (self.paddle + 1).min(max),
            CatchAction::Left => self.paddle.saturating_sub(1),
        };
    }

    fn paddle_row(&self) -> usize { self.definition.rows - 1 }

    /// The field at full resolution
    pub fn render(&self) -> GrayImage {
        let cell = self.definition.cell_size;
        let (ball_column, ball_row) = self.ball;
        let paddle_columns = self.paddle..self.paddle + self.definition.paddle_width;
        let paddle_row = self.paddle_row();
        GrayImage::from_fn(
            self.definition.columns as u32 * cell,
            self.definition.rows as u32 * cell,
            |x, y| {
                let (column, row) = ((x / cell) as usize, (y / cell) as usize);
                if (column, row) == (ball_column, ball_row) {
                    BALL
                } else if row == paddle_row && paddle_columns.contains(&column) {
                    PADDLE
                } else {
                    BACKGROUND
                }
            },
        )
    }

    /// The field scaled down to the output size
    pub fn scaled_screen(&self) -> GrayImage {
        imageops::resize(
            &self.render(),
            self.definition.output_width as u32,
            self.definition.output_height as u32,
            FilterType::Triangle,
        )
    }
}

impl Environment for CatchGame {
    fn reset(&mut self) -> Result<()> {
        self.start();
        Ok(())
    }

    fn act(
        &mut self,
        action: ActionId,
    ) -> Result<f32> {
        let action = CatchAction::try_from_code(action)?;
        if self.game_over() {
            return Ok(0.0);
        }
        self.move_paddle(action);
        self.ball.1 += 1;
        if self.ball.1 < self.paddle_row() {
            return Ok(0.0);
        }

        let caught = (self.paddle..self.paddle + self.definition.paddle_width).contains(&self.ball.0);
        let reward = if caught {
            1.0
        } else {
            self.lives -= 1;
            -1.0
        };
        self.score += reward as i32;
        if !self.game_over() {
            self.drop_ball();
        }
        Ok(reward)
    }

    fn game_over(&self) -> bool { self.lives == 0 }

    fn screen(&self) -> Result<Frame> {
        let screen = self.scaled_screen();
        Frame::from_luma(self.definition.output_height, self.definition.output_width, screen.as_raw())
    }

    fn minimal_action_set(&self) -> Vec<ActionId> { CatchAction::ALL.iter().map(|a| a.code()).collect() }

    fn screen_size(&self) -> (usize, usize) { (self.definition.output_height, self.definition.output_width) }

    fn save_frame(
        &self,
        folder: &Path,
    ) -> Result<()> {
        std::fs::create_dir_all(folder)?;
        let number = self.recorded_frames.get();
        let path = folder.join(format!("{}-{:06}.png", self.definition.name, number));
        self.render()
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        self.recorded_frames.set(number + 1);
        Ok(())
    }
}
