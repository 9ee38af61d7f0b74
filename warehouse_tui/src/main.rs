use anyhow::{Context, Result};
use clap::Parser;
use ratatui::{
    crossterm::{
        self,
        event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
        execute,
        terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
    },
    prelude::*,
    widgets::*,
};
use std::{
    io::{self, Stdout},
    path::PathBuf,
    time::{Duration, Instant},
};
use tracing::info;
use warehouse_core::{
    EntityId, ItemKind, Role,
    action::KeyState,
    config::WarehouseConfig,
    environment::{Environment, TurnSummary},
    episode::RewardKind,
    map::{BeltDirection, Cell, Tile, ZoneKind},
    policy::{HeuristicPolicy, PlanningPolicy, Policy, SharedKeys},
    substrate::ItemRegistry,
    world::WarehouseWorld,
};

mod logging;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Floor plan to load
    #[arg(short, long, value_name = "MAP_FILE", default_value = "maps/warehouse.txt")]
    map: PathBuf,

    /// TOML config; built-in defaults when omitted
    #[arg(short, long, value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Overrides the config seed
    #[arg(long)]
    seed: Option<u64>,

    /// Run without the terminal UI and log to stderr
    #[arg(long)]
    headless: bool,

    /// Turns to run in headless mode
    #[arg(long, default_value_t = 5000)]
    steps: u64,

    /// Write logs to this file
    #[arg(long, value_name = "LOG_FILE")]
    log: Option<PathBuf>,

    /// Drive the Down agent from the keyboard (WASD, 1, 2)
    #[arg(long)]
    manual: bool,
}

struct App {
    /// Both agents and the world they share.
    environment: Environment,
    /// Keyboard state read by the manual policy.
    keys: SharedKeys,
    manual: bool,
    paused: bool,
    should_quit: bool,
}

impl App {
    fn new(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => WarehouseConfig::from_file(path)?,
            None => WarehouseConfig::default(),
        };
        if let Some(seed) = args.seed {
            config.seed = seed;
        }

        let text = std::fs::read_to_string(&args.map)
            .with_context(|| format!("reading map file {}", args.map.display()))?;
        let world = WarehouseWorld::from_map_str(&text, config.world.clone())
            .with_context(|| format!("parsing map file {}", args.map.display()))?;

        let keys = SharedKeys::default();
        let manual = args.manual;
        let environment = Environment::from_config(world, &config, |role, world| -> Box<dyn Policy> {
            match role {
                Role::Down if manual => Box::new(HeuristicPolicy::new(keys.clone())),
                Role::Down => Box::new(PlanningPolicy::new(
                    role,
                    world.plan().clone(),
                    config.down.movement.observation_scale,
                )),
                Role::Up => Box::new(PlanningPolicy::new(
                    role,
                    world.plan().clone(),
                    config.up.movement.observation_scale,
                )),
            }
        });
        info!(map = %args.map.display(), seed = config.seed, manual, "environment ready");

        Ok(App {
            environment,
            keys,
            manual,
            paused: false,
            should_quit: false,
        })
    }

    /// Handles one step of the simulation.
    fn tick(&mut self) {
        if self.paused {
            return;
        }
        let summary = self.environment.step();
        log_episode_ends(&summary);
        // Keys act for one decision step per press.
        self.keys.set(KeyState::default());
    }

    fn press(&mut self, code: KeyCode) {
        let mut keys = self.keys.get();
        match code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('p') => self.paused = !self.paused,
            KeyCode::Char('w') if self.manual => keys.w = true,
            KeyCode::Char('a') if self.manual => keys.a = true,
            KeyCode::Char('s') if self.manual => keys.s = true,
            KeyCode::Char('d') if self.manual => keys.d = true,
            KeyCode::Char('1') if self.manual => keys.one = true,
            KeyCode::Char('2') if self.manual => keys.two = true,
            _ => {}
        }
        self.keys.set(keys);
    }
}

fn log_episode_ends(summary: &TurnSummary) {
    for turn in summary.agents.iter().filter(|t| t.report.is_terminal()) {
        info!(
            turn = summary.turn,
            agent = turn.agent,
            role = ?turn.role,
            episode = turn.episode,
            steps = turn.step,
            status = ?turn.report.status,
            interrupted = turn.interrupted,
            "episode finished"
        );
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.headless, args.log.as_deref())?;

    let mut app = App::new(&args)?;

    if args.headless {
        return run_headless(&mut app, args.steps);
    }

    // Set up the terminal
    let mut terminal = setup_terminal()?;

    // Run the main application loop
    let result = run_app(&mut terminal, &mut app);

    // Restore the terminal state
    restore_terminal(&mut terminal)?;

    result
}

fn run_headless(app: &mut App, steps: u64) -> Result<()> {
    for _ in 0..steps {
        let summary = app.environment.step();
        log_episode_ends(&summary);
    }
    for slot in app.environment.agents() {
        let tally = slot.tally();
        info!(
            agent = slot.controller().id(),
            role = ?slot.controller().role(),
            completed = tally.completed,
            successful = tally.successful,
            last_reward = tally.last_reward,
            "run finished"
        );
    }
    Ok(())
}

/// Configures the terminal for TUI interaction.
fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    let mut stdout = io::stdout();
    enable_raw_mode()?;
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend).map_err(Into::into)
}

/// Restores the terminal to its original state.
fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

/// Runs the main loop of the TUI application.
fn run_app(terminal: &mut Terminal<CrosstermBackend<Stdout>>, app: &mut App) -> Result<()> {
    let tick_rate = if app.manual {
        Duration::from_millis(120)
    } else {
        Duration::from_millis(40)
    };
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|f| ui(f, app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));

        if crossterm::event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.press(key.code);
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            app.tick();
            last_tick = Instant::now();
        }

        if app.should_quit {
            break;
        }
    }
    Ok(())
}

/// Renders the user interface.
fn ui(frame: &mut Frame, app: &App) {
    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(65), // Floor plan
            Constraint::Percentage(27), // Agent status
            Constraint::Percentage(8),  // Help
        ])
        .split(frame.area());

    render_map(frame, main_layout[0], &app.environment);
    render_status(frame, main_layout[1], app);

    let help = if app.manual {
        "WASD move, 1 take, 2 place, p pause, q quit"
    } else {
        "p pause, q quit"
    };
    let help_text = Paragraph::new(help)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::TOP));
    frame.render_widget(help_text, main_layout[2]);
}

fn role_color(role: Role) -> Color {
    match role {
        Role::Down => Color::Cyan,
        Role::Up => Color::Magenta,
    }
}

/// One line per agent: episode progress, held box, tallies and the last
/// step's reward events.
fn render_status(frame: &mut Frame, area: Rect, app: &App) {
    let items: Vec<ListItem> = app
        .environment
        .agents()
        .iter()
        .map(|slot| {
            let controller = slot.controller();
            let episode = controller.episode();
            let tally = slot.tally();
            let held = match controller.held_item().map(|h| h.kind) {
                Some(ItemKind::Small) => "small",
                Some(ItemKind::Large) => "large",
                None => "-",
            };
            let mut spans = vec![
                Span::styled(
                    format!("{:?} ", controller.role()),
                    Style::default().fg(role_color(controller.role())).bold(),
                ),
                Span::raw(format!(
                    "ep {} step {} reward {:+.3} taken {} delivered {} holding {} | done {} ok {}",
                    episode.index,
                    episode.steps,
                    episode.cumulative_reward,
                    episode.boxes_taken,
                    episode.boxes_delivered,
                    held,
                    tally.completed,
                    tally.successful,
                )),
            ];
            if let Some(turn) = slot.last_turn() {
                let events: Vec<String> = turn
                    .report
                    .events
                    .iter()
                    .filter(|e| e.kind != RewardKind::Step)
                    .map(|e| format!("{:?} {:+.2}", e.kind, e.value))
                    .collect();
                if !events.is_empty() {
                    spans.push(Span::styled(
                        format!("  {}", events.join(", ")),
                        Style::default().fg(Color::Yellow),
                    ));
                }
            }
            ListItem::from(Line::from(spans))
        })
        .collect();

    let title = format!("Agents (turn {})", app.environment.turn());
    let title = if app.paused {
        format!("{title} [paused]")
    } else {
        title
    };
    let status = List::new(items).block(Block::default().borders(Borders::ALL).title(title));
    frame.render_widget(status, area);
}

fn tile_span(tile: Tile) -> Span<'static> {
    match tile {
        Tile::Floor => Span::raw(" "),
        Tile::Wall => Span::styled("#", Style::default().fg(Color::DarkGray)),
        Tile::Pit => Span::styled("~", Style::default().fg(Color::Blue)),
        Tile::Belt(direction) => {
            let arrow = match direction {
                BeltDirection::North => "^",
                BeltDirection::South => "v",
                BeltDirection::East => ">",
                BeltDirection::West => "<",
            };
            Span::styled(arrow, Style::default().fg(Color::Gray))
        }
        Tile::Zone(kind) => {
            let (glyph, color) = match kind {
                ZoneKind::TruckLoad => ("t", Color::Green),
                ZoneKind::ConveyorInput => ("i", Color::Green),
                ZoneKind::ConveyorPickup => ("p", Color::Yellow),
                ZoneKind::SmallTruck => ("s", Color::LightBlue),
                ZoneKind::LargeTruck => ("l", Color::LightBlue),
                ZoneKind::UpArea => (".", Color::DarkGray),
            };
            Span::styled(glyph, Style::default().fg(color))
        }
    }
}

/// Renders the floor plan with agents and loose boxes on top.
fn render_map(frame: &mut Frame, area: Rect, environment: &Environment) {
    let world = environment.world();
    let plan = world.plan();

    let roles: Vec<(EntityId, Role)> = environment
        .agents()
        .iter()
        .map(|slot| (slot.controller().id(), slot.controller().role()))
        .collect();
    let agent_cells: Vec<(Cell, Role)> = world
        .bodies()
        .filter_map(|body| {
            let role = roles.iter().find(|(id, _)| *id == body.id)?.1;
            Some((plan.cell_at(body.position)?, role))
        })
        .collect();
    let item_cells: Vec<(Cell, ItemKind)> = world
        .all_items()
        .into_iter()
        .filter_map(|handle| {
            let pose = world.item_pose(handle.id)?;
            if pose.carrier.is_some() {
                return None;
            }
            Some((plan.cell_at(pose.position)?, handle.kind))
        })
        .collect();

    let mut lines: Vec<Line> = Vec::with_capacity(plan.height());
    for row in 0..plan.height() {
        let mut spans: Vec<Span> = Vec::with_capacity(plan.width());
        for col in 0..plan.width() {
            let cell = Cell::new(col, row);
            if let Some((_, role)) = agent_cells.iter().find(|(c, _)| *c == cell) {
                let glyph = match role {
                    Role::Down => "D",
                    Role::Up => "U",
                };
                spans.push(Span::styled(glyph, Style::default().fg(role_color(*role)).bold()));
            } else if let Some((_, kind)) = item_cells.iter().find(|(c, _)| *c == cell) {
                let glyph = match kind {
                    ItemKind::Small => "b",
                    ItemKind::Large => "B",
                };
                spans.push(Span::styled(glyph, Style::default().fg(Color::LightRed)));
            } else {
                spans.push(plan.tile(cell).map_or(Span::raw(" "), tile_span));
            }
        }
        lines.push(Line::from(spans));
    }

    let map_paragraph = Paragraph::new(lines)
        .block(Block::default().title("Warehouse").borders(Borders::ALL))
        .alignment(Alignment::Center);

    frame.render_widget(map_paragraph, area);
}
