//! Python runtime helpers injected into script spiders
//!
//! Every text here is emitted verbatim. Lines meant to live inside the
//! guarded `try` block carry their own four-space indent.

pub(crate) const IMPORTS: &[&str] = &[
    "import csv",
    "import json",
    "import os",
    "import sys",
    "from datetime import datetime",
];

pub(crate) const ENVIRONMENT: &str = r#"OUTPUT_DIR = os.environ.get('OUTPUT_DIR', '.')


def get_config():
    return json.loads(SPIDER_CONFIG_JSON)


def _emit_result(result):
    result = dict(result)
    result['spider_id'] = SPIDER_ID
    result['execution_id'] = EXECUTION_ID
    print(json.dumps(result, ensure_ascii=False, default=str), flush=True)
"#;

pub(crate) const LOG_TO_STDOUT: &str = r#"def log_message(level, message):
    try:
        timestamp = datetime.now().isoformat()
        print(f"[{timestamp}] [{level}] {message}", flush=True)
    except Exception:
        pass
"#;

pub(crate) const LOG_TO_STDERR: &str = r#"def log_message(level, message):
    try:
        timestamp = datetime.now().isoformat()
        print(f"[{timestamp}] [{level}] {message}", file=sys.stderr, flush=True)
    except Exception:
        pass
"#;

pub(crate) const SAVE_TO_FILES: &str = r#"def _is_table(data):
    return isinstance(data, list) and len(data) > 0 and all(isinstance(row, dict) for row in data)


def save_data(data, filename, format='json'):
    filepath = os.path.join(OUTPUT_DIR, filename)
    try:
        parent = os.path.dirname(filepath)
        if parent:
            os.makedirs(parent, exist_ok=True)
        if format == 'json':
            with open(filepath, 'w', encoding='utf-8') as f:
                json.dump(data, f, ensure_ascii=False, indent=2, default=str)
        elif format == 'csv' and _is_table(data):
            fieldnames = []
            for row in data:
                for key in row:
                    if key not in fieldnames:
                        fieldnames.append(key)
            with open(filepath, 'w', encoding='utf-8', newline='') as f:
                writer = csv.DictWriter(f, fieldnames=fieldnames)
                writer.writeheader()
                writer.writerows(data)
        else:
            with open(filepath, 'w', encoding='utf-8') as f:
                f.write(str(data))
        log_message('INFO', f'Data saved to {filename}')
        return filepath
    except Exception as e:
        log_message('ERROR', f'Failed to save data to {filename}: {e}')
        return None
"#;

pub(crate) const SAVE_TO_BUFFER: &str = r#"_api_results = []


def save_data(data, filename=None, format='json'):
    global _api_results
    _api_results = data if isinstance(data, list) else [data]
    log_message('INFO', f'Prepared {len(_api_results)} records')
    return _api_results
"#;

pub(crate) const FILES_EPILOGUE: &str = r#"    log_message('INFO', 'Spider execution completed successfully')
"#;

pub(crate) const DIRECT_EPILOGUE: &str = r#"    def save_data(data, filename=None, format='json'):
        global _api_results
        _api_results = data if isinstance(data, list) else [data]
        log_message('INFO', f'Prepared {len(_api_results)} records')
        return _api_results

    if callable(globals().get('spider_main')):
        _returned = spider_main()
        if not _api_results and isinstance(_returned, list):
            _api_results = _returned
        if _api_results:
            _emit_result({
                'success': True,
                'data': _api_results,
                'count': len(_api_results),
                'url': globals().get('url', ''),
                'timestamp': datetime.now().timestamp(),
                'message': f'Extracted {len(_api_results)} records',
            })
        else:
            _emit_result({
                'success': False,
                'data': [],
                'count': 0,
                'message': 'No data extracted',
            })
    else:
        _emit_result({
            'success': False,
            'data': [],
            'count': 0,
            'error': 'spider_main function not found',
        })
    log_message('INFO', 'Direct call completed')
"#;

pub(crate) const FILES_HANDLER: &str = r#"except Exception as e:
    import traceback
    error_msg = f'Spider execution failed: {e}'
    traceback_msg = traceback.format_exc()
    log_message('ERROR', error_msg)
    log_message('ERROR', f'Detailed traceback:\n{traceback_msg}')
    print(f'ERROR: {error_msg}', file=sys.stderr, flush=True)
    print(f'TRACEBACK:\n{traceback_msg}', file=sys.stderr, flush=True)
    sys.exit(1)
"#;

pub(crate) const DIRECT_HANDLER: &str = r#"except Exception as e:
    import traceback
    error_msg = f'Spider execution failed: {e}'
    traceback_msg = traceback.format_exc()
    log_message('ERROR', error_msg)
    log_message('ERROR', f'Detailed traceback:\n{traceback_msg}')
    _emit_result({
        'success': False,
        'data': [],
        'count': 0,
        'error': error_msg,
        'traceback': traceback_msg,
    })
    sys.exit(1)
"#;
