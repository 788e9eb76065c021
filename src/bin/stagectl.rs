// Stage control CLI for the TMC5160 motor HAT
//
// Small operator tool around the motor driver: absolute moves, velocity
// moves, stop, homing, and register readbacks.
//
// Usage: stagectl [--motor 0|1] <command>

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tmc5160_stage::motor::{Direction, MotorDriver, RpiTransport, Tmc5160Bus};

#[derive(Parser)]
#[command(name = "stagectl", about = "Drive a TMC5160 stage motor over SPI")]
struct Cli {
    /// Motor slot on the HAT
    #[arg(long, default_value_t = 0)]
    motor: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Move to an absolute position (microsteps)
    Goto { position: i64 },
    /// Run at constant velocity until stopped
    Velocity {
        direction: Side,
        /// Override the profile's maximum velocity for this move
        #[arg(long)]
        vmax: Option<u32>,
        /// Override the profile's maximum acceleration for this move
        #[arg(long)]
        amax: Option<u32>,
    },
    /// Decelerate to standstill and hold
    Stop,
    /// Home against a limit switch and re-base the origin
    Home { direction: Side },
    /// Print the decoded ramp status flags
    Status,
    /// Print actual position, latched position and velocity
    Position,
    /// Release the enable line, de-energizing the motor
    Disable,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Side {
    Left,
    Right,
}

impl From<Side> for Direction {
    fn from(side: Side) -> Self {
        match side {
            Side::Left => Direction::Left,
            Side::Right => Direction::Right,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let bus = Tmc5160Bus::new(RpiTransport::open()?).into_shared();
    let mut motor = MotorDriver::new(bus, cli.motor)?;

    match cli.command {
        Command::Goto { position } => {
            motor.enable()?;
            motor.go_to(position)?;
            info!("move to {} started", position);
        }
        Command::Velocity {
            direction,
            vmax,
            amax,
        } => {
            motor.enable()?;
            motor.move_at_velocity(direction.into(), vmax, amax)?;
            info!("velocity move toward {:?} started", direction);
        }
        Command::Stop => {
            motor.stop()?;
            info!("motor stopped and holding");
        }
        Command::Home { direction } => {
            motor.enable()?;
            motor.calibrate_home(direction.into())?;
        }
        Command::Status => {
            let status = motor.get_ramp_status()?;
            println!("{:#?}", status);
        }
        Command::Position => {
            println!("position: {}", motor.get_position()?);
            println!("latched:  {}", motor.get_latched_position()?);
            println!("velocity: {}", motor.get_velocity()?);
        }
        Command::Disable => {
            motor.disable()?;
            info!("motor disabled");
        }
    }

    Ok(())
}
