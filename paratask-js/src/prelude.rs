//! Runtime installed into every worker context before task logic runs.
//!
//! The prelude owns the outcome recorder (first callback wins), timers,
//! `console`, `process.nextTick` and a CommonJS `require`. It relies on the
//! native functions registered in [`crate::executor`]:
//! `__paratask_log`, `__paratask_resolve_module` and `__paratask_read_file`.

pub const PRELUDE: &str = r#"
var __paratask = (function (global) {
  'use strict';

  var slice = Array.prototype.slice;
  var outcome = null;
  var timers = {};
  var nextTimerId = 1;
  var sequence = 0;
  var moduleCache = {};

  function tagOf(value) {
    return Object.prototype.toString.call(value).slice(8, -1);
  }

  function renderError(error) {
    var name = error.name ? String(error.name) : 'Error';
    var message = error.message !== undefined ? String(error.message) : '';
    var head = name + ': ' + message;
    var stack = typeof error.stack === 'string' ? error.stack : '';
    return stack.indexOf(head) === 0 ? stack : head;
  }

  function encode(value) {
    var type = typeof value;
    if (value === undefined || type === 'function') {
      return undefined;
    }
    if (type === 'symbol' || type === 'bigint') {
      return JSON.stringify(String(value));
    }
    try {
      return JSON.stringify(value);
    } catch (e) {
      return JSON.stringify(String(value));
    }
  }

  function record(failure, value) {
    if (outcome !== null) {
      return;
    }
    if (value instanceof Error) {
      outcome = { failure: failure, kind: 'Error', encoded: JSON.stringify(renderError(value)) };
    } else {
      outcome = { failure: failure, kind: tagOf(value), encoded: encode(value) };
    }
  }

  function addTimer(callback, delay, args, repeat) {
    if (typeof callback !== 'function') {
      throw new TypeError('The "callback" argument must be of type function');
    }
    var ms = Number(delay);
    if (!(ms > 0)) {
      ms = 0;
    }
    var id = nextTimerId++;
    timers[id] = {
      id: id,
      callback: callback,
      args: args,
      delay: ms,
      due: Date.now() + ms,
      seq: sequence++,
      repeat: repeat
    };
    return id;
  }

  function removeTimer(id) {
    if (id !== undefined && id !== null) {
      delete timers[id];
    }
  }

  function nextTimer() {
    var best = null;
    for (var key in timers) {
      var timer = timers[key];
      if (best === null || timer.due < best.due || (timer.due === best.due && timer.seq < best.seq)) {
        best = timer;
      }
    }
    return best;
  }

  function formatArgs(args) {
    var parts = [];
    for (var i = 0; i < args.length; i++) {
      var arg = args[i];
      if (typeof arg === 'string') {
        parts.push(arg);
      } else if (arg instanceof Error) {
        parts.push(renderError(arg));
      } else {
        var encoded = encode(arg);
        parts.push(encoded === undefined ? String(arg) : encoded);
      }
    }
    return parts.join(' ');
  }

  function dirname(path) {
    var cut = Math.max(path.lastIndexOf('/'), path.lastIndexOf('\\'));
    return cut > 0 ? path.slice(0, cut) : path;
  }

  function makeRequire(baseDir) {
    return function require(specifier) {
      if (typeof specifier !== 'string') {
        throw new TypeError('The "id" argument must be of type string');
      }
      var resolved = __paratask_resolve_module(specifier, baseDir);
      var cached = moduleCache[resolved];
      if (cached) {
        return cached.exports;
      }
      var source = __paratask_read_file(resolved);
      var module = { id: resolved, filename: resolved, exports: {}, loaded: false };
      moduleCache[resolved] = module;
      try {
        if (/\.json$/i.test(resolved)) {
          module.exports = JSON.parse(source);
        } else {
          var dir = dirname(resolved);
          var factory = new Function('module', 'exports', 'require', '__filename', '__dirname', source);
          factory.call(module.exports, module, module.exports, makeRequire(dir), resolved, dir);
        }
      } catch (e) {
        delete moduleCache[resolved];
        throw e;
      }
      module.loaded = true;
      return module.exports;
    };
  }

  function consoleMethod(level) {
    return function () {
      __paratask_log(level, formatArgs(arguments));
    };
  }

  global.setTimeout = function (callback, delay) {
    return addTimer(callback, delay, slice.call(arguments, 2), false);
  };
  global.setInterval = function (callback, delay) {
    return addTimer(callback, delay, slice.call(arguments, 2), true);
  };
  global.setImmediate = function (callback) {
    return addTimer(callback, 0, slice.call(arguments, 1), false);
  };
  global.clearTimeout = removeTimer;
  global.clearInterval = removeTimer;
  global.clearImmediate = removeTimer;

  if (typeof global.queueMicrotask !== 'function') {
    global.queueMicrotask = function (callback) {
      Promise.resolve().then(function () { callback(); });
    };
  }

  global.process = {
    env: {},
    argv: [],
    nextTick: function (callback) {
      var args = slice.call(arguments, 1);
      Promise.resolve().then(function () { callback.apply(undefined, args); });
    }
  };

  global.console = {
    log: consoleMethod('info'),
    info: consoleMethod('info'),
    warn: consoleMethod('warn'),
    error: consoleMethod('error'),
    debug: consoleMethod('debug'),
    trace: consoleMethod('trace')
  };

  var api = {
    logic: undefined,
    moduleRoot: '.',
    require: makeRequire('.'),

    setModuleRoot: function (root) {
      api.moduleRoot = root;
      api.require = makeRequire(root);
    },

    resolve: function (value) { record(false, value); },
    reject: function (error) { record(true, error); },
    fail: function (error) { record(true, error); },

    invoke: function (arity) {
      var logic = api.logic;
      if (typeof logic !== 'function') {
        throw new TypeError('task logic is not a function');
      }
      var callbacks = [api.resolve, api.reject].slice(0, arity);
      var returned = logic.apply(undefined, callbacks);
      if (returned !== null && typeof returned === 'object' && typeof returned.then === 'function') {
        returned.then(undefined, api.fail);
      }
    },

    adoptRejection: function (promise) {
      promise.then(undefined, api.fail);
    },

    outcomeJson: function () {
      return outcome === null ? null : JSON.stringify(outcome);
    },

    nextTimerDelay: function () {
      var timer = nextTimer();
      return timer === null ? -1 : Math.max(0, timer.due - Date.now());
    },

    fireNextTimer: function () {
      var timer = nextTimer();
      if (timer === null) {
        return;
      }
      if (timer.repeat) {
        timer.due = Date.now() + timer.delay;
        timer.seq = sequence++;
      } else {
        delete timers[timer.id];
      }
      timer.callback.apply(undefined, timer.args);
    }
  };

  return api;
})(globalThis);
"#;
