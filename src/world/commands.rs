//! Command parsing and eligibility checks.
//!
//! A raw line becomes an [`Intent`] through the static [`VERBS`] table; the
//! intent is then checked against the actor's state by [`validate`]. Neither
//! step mutates anything.

use chrono::{DateTime, Utc};

use crate::world::errors::WorldError;
use crate::world::types::{Actor, Direction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StallOp {
    Open,
    Close,
    Add { item: String, price: u32 },
    List,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    // Navigation
    Move(Direction),          // N, S, E, W, U, D, NE, NW, SE, SW, GO <dir>
    Look(Option<String>),     // LOOK, LOOK <target>

    // Information
    Who,
    Score,
    Inventory,

    // Items
    Take(String),
    Drop(String),
    Equip(String),
    Unequip,

    // Combat
    Attack(String),
    Cast { spell: String, target: Option<String> },
    Flee,

    // Social
    Say(String),
    Shout(String),
    Tell { target: String, text: String },
    Emote(String),
    Ignore(Option<String>),   // IGNORE lists, IGNORE <name> adds
    Unignore(String),

    // Economy
    Stall(StallOp),
    Stalls,
    Buy { seller: String, item: String },

    // State
    Sleep,
    Wake,
    Save,
    Quit,
    Help(Option<String>),
}

impl Intent {
    pub fn verb(&self) -> &'static str {
        match self {
            Intent::Move(_) => "move",
            Intent::Look(_) => "look",
            Intent::Who => "who",
            Intent::Score => "score",
            Intent::Inventory => "inventory",
            Intent::Take(_) => "take",
            Intent::Drop(_) => "drop",
            Intent::Equip(_) => "equip",
            Intent::Unequip => "unequip",
            Intent::Attack(_) => "attack",
            Intent::Cast { .. } => "cast",
            Intent::Flee => "flee",
            Intent::Say(_) => "say",
            Intent::Shout(_) => "shout",
            Intent::Tell { .. } => "tell",
            Intent::Emote(_) => "emote",
            Intent::Ignore(_) => "ignore",
            Intent::Unignore(_) => "unignore",
            Intent::Stall(_) => "stall",
            Intent::Stalls => "stalls",
            Intent::Buy { .. } => "buy",
            Intent::Sleep => "sleep",
            Intent::Wake => "wake",
            Intent::Save => "save",
            Intent::Quit => "quit",
            Intent::Help(_) => "help",
        }
    }

    /// Allowed while asleep.
    fn allowed_while_sleeping(&self) -> bool {
        matches!(
            self,
            Intent::Wake
                | Intent::Quit
                | Intent::Help(_)
                | Intent::Who
                | Intent::Score
                | Intent::Save
                | Intent::Inventory
        )
    }

    /// Allowed while dead (between death and respawn).
    fn allowed_while_dead(&self) -> bool {
        matches!(self, Intent::Quit | Intent::Help(_) | Intent::Who | Intent::Score)
    }
}

type ParseFn = fn(&str) -> Result<Intent, WorldError>;

pub struct Verb {
    pub names: &'static [&'static str],
    pub usage: &'static str,
    parse: ParseFn,
}

fn required<'a>(rest: &'a str, usage: &str) -> Result<&'a str, WorldError> {
    let rest = rest.trim();
    if rest.is_empty() {
        Err(WorldError::InvalidCommand(format!("Usage: {}", usage)))
    } else {
        Ok(rest)
    }
}

fn optional(rest: &str) -> Option<String> {
    let rest = rest.trim();
    (!rest.is_empty()).then(|| rest.to_string())
}

fn split_word(rest: &str) -> (&str, &str) {
    let rest = rest.trim();
    match rest.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim()),
        None => (rest, ""),
    }
}

fn parse_go(rest: &str) -> Result<Intent, WorldError> {
    let word = required(rest, "GO <direction>")?;
    Direction::parse(word)
        .map(Intent::Move)
        .ok_or_else(|| WorldError::InvalidCommand(format!("'{}' is not a direction.", word)))
}

fn parse_cast(rest: &str) -> Result<Intent, WorldError> {
    let rest = required(rest, "CAST <spell> [target]")?;
    let (spell, target) = split_word(rest);
    Ok(Intent::Cast {
        spell: spell.to_ascii_lowercase(),
        target: optional(target),
    })
}

fn parse_tell(rest: &str) -> Result<Intent, WorldError> {
    let usage = "TELL <name> <message>";
    let (target, text) = split_word(required(rest, usage)?);
    if text.is_empty() {
        return Err(WorldError::InvalidCommand(format!("Usage: {}", usage)));
    }
    Ok(Intent::Tell {
        target: target.to_string(),
        text: text.to_string(),
    })
}

fn parse_stall(rest: &str) -> Result<Intent, WorldError> {
    let usage = "STALL OPEN | CLOSE | LIST | ADD <item> <price>";
    let (op, args) = split_word(required(rest, usage)?);
    let op = match op.to_ascii_lowercase().as_str() {
        "open" => StallOp::Open,
        "close" => StallOp::Close,
        "list" => StallOp::List,
        "add" => {
            let (item, price) = args
                .rsplit_once(char::is_whitespace)
                .ok_or_else(|| WorldError::InvalidCommand(format!("Usage: {}", usage)))?;
            let price = price.trim().parse::<u32>().map_err(|_| {
                WorldError::InvalidCommand("The price must be a whole number of gold.".to_string())
            })?;
            StallOp::Add {
                item: item.trim().to_string(),
                price,
            }
        }
        _ => return Err(WorldError::InvalidCommand(format!("Usage: {}", usage))),
    };
    Ok(Intent::Stall(op))
}

fn parse_buy(rest: &str) -> Result<Intent, WorldError> {
    let usage = "BUY <seller> <item>";
    let (seller, item) = split_word(required(rest, usage)?);
    if item.is_empty() {
        return Err(WorldError::InvalidCommand(format!("Usage: {}", usage)));
    }
    Ok(Intent::Buy {
        seller: seller.to_string(),
        item: item.to_string(),
    })
}

pub static VERBS: &[Verb] = &[
    Verb { names: &["go", "walk"], usage: "GO <direction>", parse: parse_go },
    Verb { names: &["look", "l"], usage: "LOOK [target]", parse: |r| Ok(Intent::Look(optional(r))) },
    Verb { names: &["who"], usage: "WHO", parse: |_| Ok(Intent::Who) },
    Verb { names: &["score", "stats"], usage: "SCORE", parse: |_| Ok(Intent::Score) },
    Verb { names: &["inventory", "inv", "i"], usage: "INVENTORY", parse: |_| Ok(Intent::Inventory) },
    Verb { names: &["take", "get"], usage: "TAKE <item>", parse: |r| Ok(Intent::Take(required(r, "TAKE <item>")?.to_string())) },
    Verb { names: &["drop"], usage: "DROP <item>", parse: |r| Ok(Intent::Drop(required(r, "DROP <item>")?.to_string())) },
    Verb { names: &["equip", "wield", "wear"], usage: "EQUIP <item>", parse: |r| Ok(Intent::Equip(required(r, "EQUIP <item>")?.to_string())) },
    Verb { names: &["unequip", "remove"], usage: "UNEQUIP", parse: |_| Ok(Intent::Unequip) },
    Verb { names: &["attack", "kill", "k"], usage: "ATTACK <target>", parse: |r| Ok(Intent::Attack(required(r, "ATTACK <target>")?.to_string())) },
    Verb { names: &["cast", "c"], usage: "CAST <spell> [target]", parse: parse_cast },
    Verb { names: &["flee"], usage: "FLEE", parse: |_| Ok(Intent::Flee) },
    Verb { names: &["say", "'"], usage: "SAY <message>", parse: |r| Ok(Intent::Say(required(r, "SAY <message>")?.to_string())) },
    Verb { names: &["shout", "yell"], usage: "SHOUT <message>", parse: |r| Ok(Intent::Shout(required(r, "SHOUT <message>")?.to_string())) },
    Verb { names: &["tell", "whisper"], usage: "TELL <name> <message>", parse: parse_tell },
    Verb { names: &["emote", "me", ":"], usage: "EMOTE <action>", parse: |r| Ok(Intent::Emote(required(r, "EMOTE <action>")?.to_string())) },
    Verb { names: &["ignore"], usage: "IGNORE [name]", parse: |r| Ok(Intent::Ignore(optional(r))) },
    Verb { names: &["unignore"], usage: "UNIGNORE <name>", parse: |r| Ok(Intent::Unignore(required(r, "UNIGNORE <name>")?.to_string())) },
    Verb { names: &["stall"], usage: "STALL OPEN | CLOSE | LIST | ADD <item> <price>", parse: parse_stall },
    Verb { names: &["stalls", "market"], usage: "STALLS", parse: |_| Ok(Intent::Stalls) },
    Verb { names: &["buy"], usage: "BUY <seller> <item>", parse: parse_buy },
    Verb { names: &["sleep", "rest"], usage: "SLEEP", parse: |_| Ok(Intent::Sleep) },
    Verb { names: &["wake", "stand"], usage: "WAKE", parse: |_| Ok(Intent::Wake) },
    Verb { names: &["save"], usage: "SAVE", parse: |_| Ok(Intent::Save) },
    Verb { names: &["quit", "exit", "logout"], usage: "QUIT", parse: |_| Ok(Intent::Quit) },
    Verb { names: &["help", "?"], usage: "HELP [command]", parse: |r| Ok(Intent::Help(optional(r))) },
];

pub fn find_verb(word: &str) -> Option<&'static Verb> {
    let word = word.to_ascii_lowercase();
    VERBS.iter().find(|v| v.names.contains(&word.as_str()))
}

/// Turn a raw line into an intent. Bare directions are moves.
pub fn parse_command(line: &str) -> Result<Intent, WorldError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(WorldError::InvalidCommand(String::new()));
    }
    // "'hello" and ":waves" work without a space
    if let Some(rest) = line.strip_prefix('\'') {
        return Ok(Intent::Say(required(rest, "SAY <message>")?.to_string()));
    }
    if let Some(rest) = line.strip_prefix(':') {
        return Ok(Intent::Emote(required(rest, "EMOTE <action>")?.to_string()));
    }

    let (head, rest) = split_word(line);
    if let Some(dir) = Direction::parse(head) {
        if rest.is_empty() {
            return Ok(Intent::Move(dir));
        }
    }
    match find_verb(head) {
        Some(verb) => (verb.parse)(rest),
        None => Err(WorldError::InvalidCommand(String::new())),
    }
}

pub fn help_text(topic: Option<&str>) -> String {
    if let Some(topic) = topic {
        return match find_verb(topic.trim()) {
            Some(verb) => format!("{} (aliases: {})", verb.usage, verb.names.join(", ")),
            None if Direction::parse(topic.trim()).is_some() => {
                "Type a direction (N, S, E, W, U, D, NE, NW, SE, SW) to move.".to_string()
            }
            None => format!("No help for '{}'.", topic.trim()),
        };
    }
    let mut lines = vec!["Commands:".to_string(), "  N S E W U D NE NW SE SW".to_string()];
    lines.extend(VERBS.iter().map(|v| format!("  {}", v.usage)));
    lines.join("\n")
}

#[derive(Debug, Clone, Copy)]
pub struct ValidationContext {
    pub now: DateTime<Utc>,
    pub in_combat: bool,
}

/// Reject intents the actor's current state does not allow.
pub fn validate(actor: &Actor, intent: &Intent, ctx: ValidationContext) -> Result<(), WorldError> {
    if !actor.is_alive() && !intent.allowed_while_dead() {
        return Err(WorldError::NotEligible("You are dead.".to_string()));
    }
    if actor.status.sleeping && !intent.allowed_while_sleeping() {
        return Err(WorldError::NotEligible(
            "You are asleep. Type WAKE first.".to_string(),
        ));
    }
    if actor.status.is_stunned(ctx.now)
        && matches!(intent, Intent::Cast { .. } | Intent::Attack(_))
    {
        return Err(WorldError::NotEligible("You are stunned!".to_string()));
    }
    match intent {
        Intent::Move(_) if ctx.in_combat => Err(WorldError::NotEligible(
            "You are fighting! Try to FLEE.".to_string(),
        )),
        Intent::Sleep if ctx.in_combat => Err(WorldError::NotEligible(
            "You can't sleep in the middle of a fight.".to_string(),
        )),
        Intent::Stall(StallOp::Open | StallOp::Add { .. }) | Intent::Buy { .. } if ctx.in_combat => {
            Err(WorldError::NotEligible("Finish your fight first.".to_string()))
        }
        Intent::Flee if !ctx.in_combat => Err(WorldError::NotEligible(
            "You aren't fighting anyone.".to_string(),
        )),
        Intent::Wake if !actor.status.sleeping => Err(WorldError::NotEligible(
            "You are already awake.".to_string(),
        )),
        Intent::Stall(_) | Intent::Buy { .. } | Intent::Ignore(_) | Intent::Unignore(_)
            if !actor.is_player() =>
        {
            Err(WorldError::NotEligible("Only players can do that.".to_string()))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::cooldown::CooldownTable;
    use crate::world::types::{ActorId, ActorKind, PlayerData, Pools, StatusFlags};

    fn player() -> Actor {
        Actor {
            id: ActorId(1),
            name: "Ada".to_string(),
            room: "city:plaza".to_string(),
            pools: Pools::full(30, 20),
            level: 1,
            status: StatusFlags::default(),
            cooldowns: CooldownTable::default(),
            kind: ActorKind::Player(PlayerData::new("ada", "city:plaza")),
        }
    }

    fn ctx(in_combat: bool) -> ValidationContext {
        ValidationContext {
            now: Utc::now(),
            in_combat,
        }
    }

    #[test]
    fn parses_movement_and_aliases() {
        assert_eq!(parse_command("n").unwrap(), Intent::Move(Direction::North));
        assert_eq!(parse_command("GO sw").unwrap(), Intent::Move(Direction::Southwest));
        assert_eq!(parse_command("climb").unwrap(), Intent::Move(Direction::Up));
        assert!(parse_command("go sideways").is_err());
    }

    #[test]
    fn chat_keeps_original_case() {
        assert_eq!(parse_command("say Hello There").unwrap(), Intent::Say("Hello There".into()));
        assert_eq!(parse_command("'hi").unwrap(), Intent::Say("hi".into()));
        assert_eq!(parse_command(":waves").unwrap(), Intent::Emote("waves".into()));
        assert_eq!(
            parse_command("tell Bob  meet me upstairs").unwrap(),
            Intent::Tell { target: "Bob".into(), text: "meet me upstairs".into() }
        );
        assert!(parse_command("tell Bob").is_err());
    }

    #[test]
    fn parses_cast_and_stall() {
        assert_eq!(
            parse_command("cast spark rat").unwrap(),
            Intent::Cast { spell: "spark".into(), target: Some("rat".into()) }
        );
        assert_eq!(
            parse_command("cast Mend").unwrap(),
            Intent::Cast { spell: "mend".into(), target: None }
        );
        assert_eq!(
            parse_command("stall add rat tail 5").unwrap(),
            Intent::Stall(StallOp::Add { item: "rat tail".into(), price: 5 })
        );
        assert!(parse_command("stall add tail lots").is_err());
        assert_eq!(
            parse_command("buy ada rat tail").unwrap(),
            Intent::Buy { seller: "ada".into(), item: "rat tail".into() }
        );
    }

    #[test]
    fn unknown_and_empty_lines_are_invalid() {
        assert!(matches!(parse_command("dance wildly"), Err(WorldError::InvalidCommand(_))));
        assert!(matches!(parse_command("   "), Err(WorldError::InvalidCommand(_))));
        assert!(matches!(parse_command("say"), Err(WorldError::InvalidCommand(_))));
    }

    #[test]
    fn sleeping_blocks_most_commands() {
        let mut actor = player();
        actor.status.sleeping = true;
        assert!(validate(&actor, &Intent::Move(Direction::North), ctx(false)).is_err());
        assert!(validate(&actor, &Intent::Say("hi".into()), ctx(false)).is_err());
        assert!(validate(&actor, &Intent::Wake, ctx(false)).is_ok());
        assert!(validate(&actor, &Intent::Score, ctx(false)).is_ok());
    }

    #[test]
    fn stun_blocks_casting_only() {
        let mut actor = player();
        let c = ctx(true);
        actor.status.stunned_until = Some(c.now + chrono::Duration::seconds(3));
        let cast = Intent::Cast { spell: "spark".into(), target: None };
        assert!(matches!(validate(&actor, &cast, c), Err(WorldError::NotEligible(_))));
        assert!(validate(&actor, &Intent::Say("ow".into()), c).is_ok());
        assert!(validate(&actor, &Intent::Flee, c).is_ok());
    }

    #[test]
    fn combat_state_rules() {
        let actor = player();
        assert!(validate(&actor, &Intent::Move(Direction::North), ctx(true)).is_err());
        assert!(validate(&actor, &Intent::Flee, ctx(false)).is_err());
        assert!(validate(&actor, &Intent::Stall(StallOp::Open), ctx(true)).is_err());
        assert!(validate(&actor, &Intent::Stall(StallOp::Close), ctx(true)).is_ok());
    }

    #[test]
    fn dead_actors_are_not_eligible() {
        let mut actor = player();
        actor.pools.health = 0;
        assert!(validate(&actor, &Intent::Attack("rat".into()), ctx(false)).is_err());
        assert!(validate(&actor, &Intent::Quit, ctx(false)).is_ok());
    }

    #[test]
    fn help_lists_every_verb() {
        let text = help_text(None);
        for verb in VERBS {
            assert!(text.contains(verb.usage));
        }
        assert!(help_text(Some("k")).contains("ATTACK"));
    }
}
