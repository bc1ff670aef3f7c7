//! Command registry: maps `/command` tokens to data-driven handler descriptors.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::bot::formatter::OutputRule;
use crate::bot::message::IncomingMessage;
use crate::providers::{Provider, ProviderId, ProviderSet};

/// `/token`, optional `@botname`, optional whitespace-separated argument.
static COMMAND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^/([A-Za-z0-9_]+)(?:@([A-Za-z0-9_]+))?(?:\s+(.*))?$")
        .expect("valid command pattern")
});

/// ISO 639 language code, optionally with a region or script ("fr", "pt-BR", "zh-Hant").
static LANGUAGE_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z]{2,3}(-[A-Za-z]{2,4})?$").expect("valid language pattern")
});

const TEXT_PLACEHOLDER: &str = "Processing your request, please wait...";
const TEXT_FAILURE: &str = "Sorry, an error occurred while processing your request.";
const IMAGE_PLACEHOLDER: &str = "Generating image, please wait...";
const IMAGE_FAILURE: &str = "Sorry, an error occurred while generating the image.";
const TRS_MISSING_REPLY: &str =
    "Please reply to a text message with /trs <language code> to translate it.";
const DETECT_MISSING_REPLY: &str =
    "Please reply to a text message with /detect to detect its language.";

/// What the argument after the command token must look like.
#[derive(Debug, Clone)]
pub enum ArgumentRule {
    /// Anything after the token is ignored.
    Ignored,
    Optional,
    Required,
    /// Required, and must match `pattern`. `hint` is shown when it doesn't.
    Matching { pattern: Regex, hint: &'static str },
}

/// What the replied-to message must carry.
#[derive(Debug, Clone)]
pub enum ReplyRule {
    None,
    Text {
        /// Shown when the command is not a reply at all.
        missing_reply: &'static str,
        /// Shown when the replied-to message has no usable text.
        missing_text: &'static str,
    },
    Photo {
        missing_photo: &'static str,
    },
}

/// How a provider request is assembled from the invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTemplate {
    /// Argument is the prompt.
    Text,
    /// Argument is the prompt, session history is the context.
    Conversation,
    /// Argument is the image prompt.
    Image,
    /// Replied-to photo, argument or `default_prompt` as the instruction.
    Describe { default_prompt: &'static str },
    /// Replied-to text, argument is the target language.
    Translate,
    /// Replied-to text.
    DetectLanguage,
    /// Argument is a place name.
    Geocode,
    Weather,
    LocalTime,
}

/// Static descriptor for one command.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: &'static str,
    pub usage: &'static str,
    pub description: &'static str,
    pub argument: ArgumentRule,
    pub reply: ReplyRule,
    pub provider: ProviderId,
    pub template: RequestTemplate,
    pub output: OutputRule,
    pub placeholder: &'static str,
    pub failure_notice: &'static str,
}

/// A command ready to run.
#[derive(Clone)]
pub struct Invocation {
    pub spec: Arc<CommandSpec>,
    pub provider: Arc<dyn Provider>,
    pub chat_id: i64,
    pub message_id: i64,
    pub sender: String,
    pub argument: Option<String>,
    pub replied_text: Option<String>,
    /// File id of the replied-to photo.
    pub replied_photo: Option<String>,
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("command", &self.spec.name)
            .field("provider", &self.provider.name())
            .field("chat_id", &self.chat_id)
            .field("message_id", &self.message_id)
            .field("argument", &self.argument)
            .finish_non_exhaustive()
    }
}

/// Result of resolving an inbound message.
#[derive(Debug)]
pub enum Resolution {
    /// Run the lifecycle.
    Matched(Invocation),
    /// Reply context is missing; send this guidance and call nothing.
    MissingPrecondition(&'static str),
    /// The command's provider is not configured.
    Unavailable(String),
    /// Fixed reply, no provider involved.
    Static(String),
    /// Not a command this bot handles.
    NoMatch,
}

pub struct CommandRegistry {
    bot_name: &'static str,
    bot_username: Option<String>,
    commands: Vec<Arc<CommandSpec>>,
    by_name: HashMap<&'static str, Arc<CommandSpec>>,
    providers: ProviderSet,
}

impl CommandRegistry {
    /// Registry with the standard command set.
    pub fn new(bot_username: Option<String>, providers: ProviderSet) -> Self {
        Self::with_commands(bot_username, providers, standard_commands())
    }

    pub fn with_commands(
        bot_username: Option<String>,
        providers: ProviderSet,
        specs: Vec<CommandSpec>,
    ) -> Self {
        let commands: Vec<Arc<CommandSpec>> = specs.into_iter().map(Arc::new).collect();
        let by_name = commands.iter().map(|c| (c.name, c.clone())).collect();
        Self {
            bot_name: "NourBot",
            bot_username,
            commands,
            by_name,
            providers,
        }
    }

    /// Commands whose provider is configured, in registration order.
    pub fn available(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands
            .iter()
            .filter(|c| self.providers.contains_key(&c.provider))
            .map(|c| c.as_ref())
    }

    /// Greeting listing what this instance can do.
    pub fn welcome(&self) -> String {
        let mut text = format!(
            "Hello, I'm {}!\nWelcome to the bot. Here's what I can do:\n",
            self.bot_name
        );
        for spec in self.available() {
            text.push_str(&format!("- {}: {}\n", spec.usage, spec.description));
        }
        text
    }

    pub fn resolve(&self, message: &IncomingMessage) -> Resolution {
        let Some(caps) = COMMAND_RE.captures(message.text.trim()) else {
            return Resolution::NoMatch;
        };

        if let (Some(mention), Some(me)) = (caps.get(2), self.bot_username.as_deref())
            && !mention.as_str().eq_ignore_ascii_case(me)
        {
            return Resolution::NoMatch;
        }

        let token = caps[1].to_ascii_lowercase();
        if token == "start" || token == "help" {
            return Resolution::Static(self.welcome());
        }

        let Some(spec) = self.by_name.get(token.as_str()) else {
            return Resolution::NoMatch;
        };

        let argument = caps
            .get(3)
            .map(|m| m.as_str().trim().to_string())
            .filter(|a| !a.is_empty());

        let mut bad_argument = None;
        let argument = match &spec.argument {
            ArgumentRule::Ignored => None,
            ArgumentRule::Optional => argument,
            ArgumentRule::Required if argument.is_none() => return Resolution::NoMatch,
            ArgumentRule::Required => argument,
            ArgumentRule::Matching { pattern, hint } => match argument {
                Some(a) if pattern.is_match(&a) => Some(a),
                _ => {
                    bad_argument = Some(*hint);
                    None
                }
            },
        };

        let Some(provider) = self.providers.get(&spec.provider).cloned() else {
            return Resolution::Unavailable(format!(
                "/{} is not available on this bot right now.",
                spec.name
            ));
        };
        if let Some(hint) = bad_argument {
            return Resolution::MissingPrecondition(hint);
        }

        let mut replied_text = None;
        let mut replied_photo = None;
        match spec.reply {
            ReplyRule::None => {}
            ReplyRule::Text { missing_reply, missing_text } => {
                let Some(reply) = message.reply_to.as_ref() else {
                    return Resolution::MissingPrecondition(missing_reply);
                };
                match reply.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
                    Some(text) => replied_text = Some(text.to_string()),
                    None => return Resolution::MissingPrecondition(missing_text),
                }
            }
            ReplyRule::Photo { missing_photo } => {
                match message.reply_to.as_ref().and_then(|r| r.photo_file_id.clone()) {
                    Some(file_id) => replied_photo = Some(file_id),
                    None => return Resolution::MissingPrecondition(missing_photo),
                }
            }
        }

        Resolution::Matched(Invocation {
            spec: spec.clone(),
            provider,
            chat_id: message.chat_id,
            message_id: message.message_id,
            sender: message.sender.clone(),
            argument,
            replied_text,
            replied_photo,
        })
    }
}

/// The bot's command table.
pub fn standard_commands() -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            name: "ask",
            usage: "/ask <question>",
            description: "answer your questions",
            argument: ArgumentRule::Required,
            reply: ReplyRule::None,
            provider: ProviderId::Gemini,
            template: RequestTemplate::Text,
            output: OutputRule::Markdown,
            placeholder: TEXT_PLACEHOLDER,
            failure_notice: TEXT_FAILURE,
        },
        CommandSpec {
            name: "chat",
            usage: "/chat <message>",
            description: "chat with me, I remember the conversation",
            argument: ArgumentRule::Required,
            reply: ReplyRule::None,
            provider: ProviderId::Gemini,
            template: RequestTemplate::Conversation,
            output: OutputRule::Markdown,
            placeholder: TEXT_PLACEHOLDER,
            failure_notice: TEXT_FAILURE,
        },
        CommandSpec {
            name: "tell",
            usage: "/tell <question>",
            description: "answer with Mixtral",
            argument: ArgumentRule::Required,
            reply: ReplyRule::None,
            provider: ProviderId::ReplicateMixtral,
            template: RequestTemplate::Text,
            output: OutputRule::Spaced,
            placeholder: TEXT_PLACEHOLDER,
            failure_notice: TEXT_FAILURE,
        },
        CommandSpec {
            name: "img",
            usage: "/img <prompt>",
            description: "generate an image with Stable Diffusion",
            argument: ArgumentRule::Required,
            reply: ReplyRule::None,
            provider: ProviderId::Stability,
            template: RequestTemplate::Image,
            output: OutputRule::Photo,
            placeholder: IMAGE_PLACEHOLDER,
            failure_notice: IMAGE_FAILURE,
        },
        CommandSpec {
            name: "art",
            usage: "/art <prompt>",
            description: "generate AI art",
            argument: ArgumentRule::Required,
            reply: ReplyRule::None,
            provider: ProviderId::ReplicatePlayground,
            template: RequestTemplate::Image,
            output: OutputRule::ArtPhoto,
            placeholder: IMAGE_PLACEHOLDER,
            failure_notice: IMAGE_FAILURE,
        },
        CommandSpec {
            name: "trs",
            usage: "/trs <language code>",
            description: "translate the message you reply to",
            argument: ArgumentRule::Matching {
                pattern: LANGUAGE_CODE_RE.clone(),
                hint: "Please give a target language code, for example /trs fr.",
            },
            reply: ReplyRule::Text {
                missing_reply: TRS_MISSING_REPLY,
                missing_text: "The message to translate is empty or not a text message.",
            },
            provider: ProviderId::Translate,
            template: RequestTemplate::Translate,
            output: OutputRule::Plain,
            placeholder: "Translating, please wait...",
            failure_notice: "Sorry, an error occurred while translating the message.",
        },
        CommandSpec {
            name: "detect",
            usage: "/detect",
            description: "detect the language of the message you reply to",
            argument: ArgumentRule::Ignored,
            reply: ReplyRule::Text {
                missing_reply: DETECT_MISSING_REPLY,
                missing_text: "The message to analyse is empty or not a text message.",
            },
            provider: ProviderId::Translate,
            template: RequestTemplate::DetectLanguage,
            output: OutputRule::Plain,
            placeholder: TEXT_PLACEHOLDER,
            failure_notice: TEXT_FAILURE,
        },
        CommandSpec {
            name: "describe",
            usage: "/describe [question]",
            description: "describe the photo you reply to",
            argument: ArgumentRule::Optional,
            reply: ReplyRule::Photo {
                missing_photo: "Please reply to a photo with /describe to get a description of it.",
            },
            provider: ProviderId::Gemini,
            template: RequestTemplate::Describe {
                default_prompt: "Describe this image in detail.",
            },
            output: OutputRule::Markdown,
            placeholder: "Looking at the image, please wait...",
            failure_notice: "Sorry, an error occurred while describing the image.",
        },
        CommandSpec {
            name: "weather",
            usage: "/weather <place>",
            description: "current weather",
            argument: ArgumentRule::Required,
            reply: ReplyRule::None,
            provider: ProviderId::OpenWeather,
            template: RequestTemplate::Weather,
            output: OutputRule::Plain,
            placeholder: "Fetching weather, please wait...",
            failure_notice: "Sorry, an error occurred while fetching the weather.",
        },
        CommandSpec {
            name: "geo",
            usage: "/geo <place>",
            description: "coordinates of a place",
            argument: ArgumentRule::Required,
            reply: ReplyRule::None,
            provider: ProviderId::OpenWeather,
            template: RequestTemplate::Geocode,
            output: OutputRule::Plain,
            placeholder: TEXT_PLACEHOLDER,
            failure_notice: TEXT_FAILURE,
        },
        CommandSpec {
            name: "time",
            usage: "/time <place>",
            description: "current local time",
            argument: ArgumentRule::Required,
            reply: ReplyRule::None,
            provider: ProviderId::TimeApi,
            template: RequestTemplate::LocalTime,
            output: OutputRule::Plain,
            placeholder: TEXT_PLACEHOLDER,
            failure_notice: TEXT_FAILURE,
        },
    ]
}
